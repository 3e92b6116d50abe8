//! In-memory suspect registry.
//!
//! Copy-on-append: every registration publishes a fresh vector, so a
//! snapshot taken by the match loop stays valid and consistent for as long as
//! it is held, no matter how many registrations happen meanwhile.

use crate::types::{Encoding, Suspect, SuspectId};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("suspect encoding is empty")]
    EmptyEncoding,
    #[error("suspect encoding has {actual} dimensions, registry uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Consistent view of all registered suspects, in insertion order.
pub type RegistrySnapshot = Arc<Vec<Suspect>>;

#[derive(Debug, Default)]
pub struct SuspectRegistry {
    suspects: RwLock<RegistrySnapshot>,
}

impl SuspectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a suspect and return its id (its position).
    ///
    /// Every encoding in the registry has the dimension of the first one.
    pub fn register(
        &self,
        encoding: Encoding,
        name: &str,
        details: &str,
    ) -> Result<SuspectId, RegistryError> {
        if encoding.is_empty() {
            return Err(RegistryError::EmptyEncoding);
        }

        let mut guard = self.suspects.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(first) = guard.first() {
            if first.encoding.len() != encoding.len() {
                return Err(RegistryError::DimensionMismatch {
                    expected: first.encoding.len(),
                    actual: encoding.len(),
                });
            }
        }
        let id = SuspectId(guard.len());

        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Suspect {
            id,
            name: name.to_string(),
            details: details.to_string(),
            encoding,
        });
        *guard = Arc::new(next);

        tracing::info!(id = id.0, name, total = guard.len(), "suspect registered");
        Ok(id)
    }

    /// Dimension shared by every registered encoding, once anyone is registered.
    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().first().map(|s| s.encoding.len())
    }

    /// Snapshot of every suspect, in insertion order.
    pub fn snapshot(&self) -> RegistrySnapshot {
        Arc::clone(&self.suspects.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, id: SuspectId) -> Option<Suspect> {
        self.snapshot().get(id.0).cloned()
    }

    pub fn len(&self) -> usize {
        self.suspects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
