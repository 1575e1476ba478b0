use std::fmt;

use livegen_core::{Artifact, SnapshotLedger};

/// Stable identifier of a project whose artifact is being generated.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The (project, epoch) pair a session captures at start.
///
/// A handler holding a lock that no longer matches the pipeline's active
/// lock belongs to a stale session and must not write shared state.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GenerationLock {
    pub project: ProjectId,
    pub epoch: u64,
}

impl fmt::Display for GenerationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.epoch)
    }
}

/// Per-project state owned by the pipeline. Abort never touches it.
#[derive(Clone, Debug, Default)]
pub struct ProjectState {
    /// Last artifact that passed validation and the guards.
    pub known_good: Option<Artifact>,
    pub ledger: SnapshotLedger,
}

impl ProjectState {
    pub fn new(known_good: Option<Artifact>, ledger_capacity: usize) -> Self {
        Self {
            known_good,
            ledger: SnapshotLedger::with_capacity(ledger_capacity),
        }
    }
}
