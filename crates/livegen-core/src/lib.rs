pub mod artifact;
pub mod config;
pub mod extract;
pub mod failure;
pub mod guard;
pub mod markers;
pub mod mode;
pub mod observability;
pub mod recovery;
pub mod snapshot;
pub mod validate;

// Flat re-exports for the types the stream crate and the CLI use most.
pub use artifact::Artifact;
pub use config::{ConfigError, PipelineConfig};
pub use extract::{Extraction, extract, extract_summary, unwrap_envelope};
pub use failure::{FailureKind, GenerationFailure};
pub use guard::{ApplyDecision, GuardConfig, GuardName, GuardProfile, GuardResult, GuardrailEngine};
pub use mode::{Mode, ModeResolver, Resolution};
pub use observability::{LogSink, ObservabilitySettings, init_observability};
pub use recovery::{ContinuationPolicy, RecoveryCoordinator, merge_continuation};
pub use snapshot::{Snapshot, SnapshotLedger};
pub use validate::{ValidationResult, Validator, sanity_check, validate};
