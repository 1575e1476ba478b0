use livegen_core::{Artifact, FailureKind};
use serde::{Deserialize, Serialize};

use crate::event::StreamEvent;
use crate::project::ProjectId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// Outbound side of the pipeline: persistence, history and UI notifications.
///
/// Only persistence and history are required; every notification defaults to
/// a no-op.
#[async_trait::async_trait]
pub trait Collaborators: Send + Sync {
    /// Stores an accepted artifact. `attribution_id` is the session that produced it.
    async fn persist_artifact(&self, project: &ProjectId, artifact: &Artifact, attribution_id: uuid::Uuid);

    async fn append_history_entry(
        &self,
        project: &ProjectId,
        role: HistoryRole,
        text: &str,
        artifact: Option<&Artifact>,
    );

    async fn notify_phase(&self, _phase: &str) {}

    /// Live preview of a candidate that passed validation.
    async fn notify_preview(&self, _artifact: &Artifact) {}

    async fn notify_error(&self, _kind: FailureKind, _message: &str) {}

    /// Passthrough of text, suggestions, questions and confidence events.
    async fn notify_event(&self, _event: &StreamEvent) {}

    /// Asks the producer to finish a truncated artifact.
    async fn request_continuation(&self, _partial: &Artifact, _instruction: &str) -> Option<Artifact> {
        None
    }
}

/// Collaborators that drop everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCollaborators;

#[async_trait::async_trait]
impl Collaborators for NoopCollaborators {
    async fn persist_artifact(&self, _project: &ProjectId, _artifact: &Artifact, _attribution_id: uuid::Uuid) {}

    async fn append_history_entry(
        &self,
        _project: &ProjectId,
        _role: HistoryRole,
        _text: &str,
        _artifact: Option<&Artifact>,
    ) {
    }
}
