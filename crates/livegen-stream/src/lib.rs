//! Async consumer for code generation streams with a builder-first API.
//!
//! Producers are plugged in through [`GenerationSource`]; the HTTP producer
//! lives under `vendors::http`. Outbound effects go through [`Collaborators`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use livegen_stream::prelude::*;
//! use livegen_stream::vendors::http::HttpSource;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PipelineError> {
//! let pipeline = Pipeline::builder()
//!     .source(Arc::new(HttpSource::from_env()?))
//!     .build()?;
//!
//! pipeline.open_project("landing", None);
//! let outcome = pipeline
//!     .start("Add a pricing section")
//!     .await?
//!     .finish()
//!     .await?;
//! println!("{}", outcome.label());
//! # Ok(())
//! # }
//! ```

/// Outbound collaborator contract and a no-op implementation.
pub mod collaborators;
/// Line-oriented decoder for the event-tagged wire format.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Typed stream events and their payloads.
pub mod event;
/// Pipeline entry point, builder and run handles.
pub mod pipeline;
/// Common imports for typical usage.
pub mod prelude;
/// Project identity, generation locks and per-project state.
pub mod project;
/// Per-request session state.
pub mod session;
/// Generation source contract and the replay source.
pub mod source;
/// Producer integrations.
pub mod vendors;

pub use collaborators::{Collaborators, HistoryRole, NoopCollaborators};
pub use decoder::{Decoded, EventDecoder};
pub use errors::{PipelineError, SourceError};
pub use event::{Question, QuestionOption, StreamEvent, Suggestion};
pub use pipeline::{AbortHandle, GenerationRun, Pipeline, PipelineBuilder, SessionOutcome};
pub use project::{GenerationLock, ProjectId, ProjectState};
pub use session::{Conclusion, SessionEffect, StreamSession};
pub use source::{ByteStream, GenerationRequest, GenerationSource, ReplaySource};
