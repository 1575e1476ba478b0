use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::Artifact;
use crate::validate::{EntryPointRule, SourceRule};

const TRUNCATION_CODES: [&str; 4] = ["truncated", "output_truncated", "max_tokens", "length"];

/// True for producer error codes that confirm truncated output.
pub fn is_truncation_code(code: &str) -> bool {
    let code = code.trim();
    TRUNCATION_CODES.iter().any(|c| c.eq_ignore_ascii_case(code))
}

/// Budget for continuation requests after a confirmed truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationPolicy {
    /// Continuation requests allowed per session.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_max_retries() -> u32 {
    1
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

impl ContinuationPolicy {
    pub const fn none() -> Self {
        Self { max_retries: 0 }
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    ContinuationRequested,
}

/// Tracks continuation attempts for one session.
#[derive(Debug, Clone)]
pub struct RecoveryCoordinator {
    policy: ContinuationPolicy,
    state: RecoveryState,
    attempts: u32,
}

impl RecoveryCoordinator {
    pub fn new(policy: ContinuationPolicy) -> Self {
        Self {
            policy,
            state: RecoveryState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Moves to `ContinuationRequested`; false when the budget is spent
    /// or a request is already outstanding.
    pub fn begin(&mut self) -> bool {
        if self.state != RecoveryState::Idle || !self.policy.can_retry(self.attempts) {
            return false;
        }
        self.attempts += 1;
        self.state = RecoveryState::ContinuationRequested;
        debug!(attempt = self.attempts, max = self.policy.max_retries, "continuation requested");
        true
    }

    pub fn complete(&mut self, success: bool) {
        debug!(attempt = self.attempts, success, "continuation completed");
        self.state = RecoveryState::Idle;
    }
}

/// Combines a truncated artifact with its continuation.
///
/// File maps merge with continuation entries overriding. A single source is
/// replaced when the continuation carries its own entry point, and appended
/// to otherwise.
pub fn merge_continuation(partial: &Artifact, continuation: &Artifact) -> Artifact {
    match (partial, continuation) {
        (Artifact::Files { files }, Artifact::Files { files: more }) => {
            let mut merged = files.clone();
            merged.extend(more.iter().map(|(p, s)| (p.clone(), s.clone())));
            Artifact::Files { files: merged }
        }
        (Artifact::Single { .. }, Artifact::Files { .. }) => continuation.clone(),
        (Artifact::Files { files }, Artifact::Single { source }) => {
            let mut merged = files.clone();
            let primary = partial.primary_path().unwrap_or("/App.tsx").to_string();
            let entry = merged.entry(primary).or_default();
            let joined = append_or_replace(entry.as_str(), source);
            *entry = joined;
            Artifact::Files { files: merged }
        }
        (Artifact::Single { source: head }, Artifact::Single { source: tail }) => {
            Artifact::single(append_or_replace(head, tail))
        }
    }
}

fn append_or_replace(head: &str, tail: &str) -> String {
    if EntryPointRule.check(tail).is_none() {
        return tail.to_string();
    }
    let mut out = String::with_capacity(head.len() + tail.len() + 1);
    out.push_str(head);
    if !head.ends_with('\n') && !tail.starts_with('\n') {
        out.push('\n');
    }
    out.push_str(tail);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_codes_are_case_insensitive() {
        assert!(is_truncation_code("MAX_TOKENS"));
        assert!(is_truncation_code(" length "));
        assert!(!is_truncation_code("rate_limited"));
    }

    #[test]
    fn coordinator_respects_budget() {
        let mut c = RecoveryCoordinator::new(ContinuationPolicy::default());
        assert!(c.begin());
        assert!(!c.begin());
        c.complete(false);
        assert_eq!(c.state(), RecoveryState::Idle);
        assert!(!c.begin());
        assert_eq!(c.attempts(), 1);

        let mut none = RecoveryCoordinator::new(ContinuationPolicy::none());
        assert!(!none.begin());
    }

    #[test]
    fn files_merge_with_continuation_overriding() {
        let partial = Artifact::files([("/App.tsx", "cut"), ("/a.css", "x")]);
        let cont = Artifact::files([("/App.tsx", "whole"), ("/b.tsx", "y")]);
        let merged = merge_continuation(&partial, &cont);
        assert_eq!(merged.primary_source(), "whole");
        assert_eq!(merged.file_count(), 3);
    }

    #[test]
    fn single_sources_append_or_replace() {
        let head = Artifact::single("export default function App() {\n  return (");
        let tail = Artifact::single("<div />);\n}");
        assert_eq!(
            merge_continuation(&head, &tail),
            Artifact::single("export default function App() {\n  return (\n<div />);\n}")
        );
        let full = Artifact::single("export default function App() { return null }");
        assert_eq!(merge_continuation(&head, &full), full);
    }
}
