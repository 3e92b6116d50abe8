use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_hw::Frame;

/// Face feature vector produced by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Both non-empty and of the same dimension.
    pub fn is_comparable(&self, other: &Encoding) -> bool {
        !self.is_empty() && self.len() == other.len()
    }

    /// Euclidean distance between two encodings. Lower = more similar.
    ///
    /// `None` unless the encodings are comparable.
    pub fn euclidean_distance(&self, other: &Encoding) -> Option<f32> {
        if !self.is_comparable(other) {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        Some(sum.sqrt())
    }
}

impl From<Vec<f32>> for Encoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Position of a suspect in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuspectId(pub usize);

impl std::fmt::Display for SuspectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered subject. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Suspect {
    pub id: SuspectId,
    pub name: String,
    pub details: String,
    pub encoding: Encoding,
}

/// Outcome of evaluating one frame against the registry.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The accepted suspect, if any.
    pub suspect: Option<Suspect>,
    /// Distance of the accepted match, or of the closest rejected candidate.
    pub distance: Option<f32>,
    /// `1 - distance`, clamped to [0, 1]. Zero when nothing was compared.
    pub confidence: f32,
    pub frame: Arc<Frame>,
}

impl MatchResult {
    pub fn no_match(frame: Arc<Frame>, closest: Option<f32>) -> Self {
        Self {
            suspect: None,
            distance: closest,
            confidence: closest.map(confidence_from_distance).unwrap_or(0.0),
            frame,
        }
    }

    pub fn is_match(&self) -> bool {
        self.suspect.is_some()
    }

    pub fn suspect_id(&self) -> Option<SuspectId> {
        self.suspect.as_ref().map(|s| s.id)
    }
}

/// Confidence reported to users for a given distance.
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}
