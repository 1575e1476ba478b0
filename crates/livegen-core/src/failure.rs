use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed reason a generation attempt did not replace the known-good artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The buffer never yielded a plausible program start.
    NoCodeExtracted,
    /// Code was extracted but is implausibly short.
    IncompleteOutput,
    /// The structural scan or a source rule failed.
    ValidationFailed,
    /// A structured stream closed without a terminal event.
    StreamEndedEarly,
    /// One or more guards rejected the rewrite.
    GuardrailRejected,
    /// Post-guard size-collapse heuristic fired.
    SuspiciousOutput,
    /// The producer reported truncation and recovery did not succeed.
    TruncationConfirmed,
    /// Caller-level quota or credit exhaustion.
    InsufficientResource,
    /// Any other producer-reported error.
    ProducerError,
    /// The byte stream failed mid-session.
    TransportFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoCodeExtracted => "NO_CODE_EXTRACTED",
            FailureKind::IncompleteOutput => "INCOMPLETE_OUTPUT",
            FailureKind::ValidationFailed => "VALIDATION_FAILED",
            FailureKind::StreamEndedEarly => "STREAM_ENDED_EARLY",
            FailureKind::GuardrailRejected => "GUARDRAIL_REJECTED",
            FailureKind::SuspiciousOutput => "SUSPICIOUS_OUTPUT",
            FailureKind::TruncationConfirmed => "TRUNCATION_CONFIRMED",
            FailureKind::InsufficientResource => "INSUFFICIENT_RESOURCE",
            FailureKind::ProducerError => "PRODUCER_ERROR",
            FailureKind::TransportFailed => "TRANSPORT_FAILED",
        }
    }

    /// Maps a producer `error` event code onto the taxonomy.
    pub fn from_producer_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        if crate::recovery::is_truncation_code(&code) {
            return FailureKind::TruncationConfirmed;
        }
        match code.as_str() {
            "insufficient_credits" | "quota_exceeded" | "insufficient_resource" => {
                FailureKind::InsufficientResource
            }
            _ => FailureKind::ProducerError,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure resolved at the session boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GenerationFailure {
    pub kind: FailureKind,
    /// User-facing explanation; always says why, never just "failed".
    pub message: String,
    /// 1-based source line when the failure points at one.
    pub line: Option<usize>,
}

impl GenerationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }
}
