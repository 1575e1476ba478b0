//! Common imports for typical pipeline usage.
pub use crate::{
    AbortHandle, Collaborators, GenerationRun, GenerationSource, HistoryRole, Pipeline,
    PipelineBuilder, PipelineError, ProjectId, ReplaySource, SessionOutcome, StreamEvent,
};
pub use livegen_core::{Artifact, FailureKind, PipelineConfig};
