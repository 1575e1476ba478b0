use livegen_core::ConfigError;

use crate::project::ProjectId;

/// Errors raised by a generation source while opening or reading a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The producer answered with a failure status.
    #[error("source error ({origin}): {message}")]
    Status {
        origin: String,
        message: String,
        status_code: Option<u16>,
    },
    /// Network or byte-stream I/O failed.
    #[error("transport error ({origin}): {message}")]
    Transport { origin: String, message: String },
    /// The source is not usable as configured.
    #[error("source config error: {0}")]
    Config(String),
}

impl SourceError {
    pub fn status(
        origin: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Status {
            origin: origin.into(),
            message: message.into(),
            status_code,
        }
    }

    pub fn transport(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Status { message, .. } | Self::Transport { message, .. } => message,
            Self::Config(message) => message,
        }
    }
}

/// API misuse and startup failures. Generation failures are not errors;
/// they resolve to `SessionOutcome::Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no active project")]
    NoActiveProject,
    #[error("unknown project: {0}")]
    UnknownProject(ProjectId),
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Internal invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<ConfigError> for PipelineError {
    fn from(value: ConfigError) -> Self {
        PipelineError::Config(value.to_string())
    }
}
