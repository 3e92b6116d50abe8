//! vigil-core: Suspect matching and alerting engine.
//!
//! Holds the suspect registry, the per-frame match pipeline, the alert
//! debouncer, and the append-only alert log. Face detection/encoding is
//! injected through the `FaceMatcher` trait.

pub mod alert_log;
pub mod debounce;
pub mod layout;
pub mod matcher;
pub mod pipeline;
pub mod registry;
pub mod types;

pub use alert_log::{Alert, AlertLog, AlertLogError};
pub use debounce::{AlertDebouncer, DebounceState};
pub use layout::DataLayout;
pub use matcher::{CommandMatcher, FaceMatcher, MatcherError};
pub use pipeline::MatchPipeline;
pub use registry::{RegistryError, RegistrySnapshot, SuspectRegistry};
pub use types::{Encoding, MatchResult, Suspect, SuspectId};
