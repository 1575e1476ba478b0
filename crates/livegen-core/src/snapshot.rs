use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

pub const DEFAULT_LEDGER_CAPACITY: usize = 10;

/// One accepted artifact together with the instruction that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub artifact: Artifact,
    pub timestamp: DateTime<Utc>,
    pub instruction: String,
}

/// Bounded FIFO of accepted artifacts, oldest evicted first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotLedger {
    capacity: usize,
    entries: VecDeque<Snapshot>,
}

impl Default for SnapshotLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }
}

impl SnapshotLedger {
    /// A zero capacity is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&mut self, artifact: Artifact, instruction: impl Into<String>) -> &Snapshot {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Snapshot {
            artifact,
            timestamp: Utc::now(),
            instruction: instruction.into(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    /// Index 0 is the oldest retained snapshot.
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads back the snapshot `steps` behind the newest (0 = newest).
    ///
    /// The ledger itself is not modified.
    pub fn rollback(&self, steps: usize) -> Option<&Snapshot> {
        let index = self.entries.len().checked_sub(steps + 1)?;
        self.entries.get(index)
    }
}
