use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::guard::GuardConfig;
use crate::recovery::ContinuationPolicy;
use crate::snapshot::DEFAULT_LEDGER_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a generation pipeline. `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Raw buffer length after which an unmarked session is treated as code.
    #[serde(default = "default_mode_fallback_chars")]
    pub mode_fallback_chars: usize,
    /// Extracted sources shorter than this fail as incomplete output.
    #[serde(default = "default_min_source_chars")]
    pub min_source_chars: usize,
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
    /// Enables the hero-before-nav layout rule.
    #[serde(default = "default_layout_policy")]
    pub layout_policy: bool,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub continuation: ContinuationPolicy,
}

const fn default_mode_fallback_chars() -> usize {
    400
}

const fn default_min_source_chars() -> usize {
    80
}

const fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}

const fn default_layout_policy() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode_fallback_chars: default_mode_fallback_chars(),
            min_source_chars: default_min_source_chars(),
            ledger_capacity: default_ledger_capacity(),
            layout_policy: default_layout_policy(),
            guard: GuardConfig::default(),
            continuation: ContinuationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ledger_capacity must be greater than zero".to_string(),
            ));
        }
        self.guard.validate().map_err(ConfigError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config = PipelineConfig::from_json_str("{}").expect("config");
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.guard.activation_chars, 200);
        assert_eq!(config.continuation.max_retries, 1);
        assert!(config.layout_policy);
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            r#"{{"layout_policy": false, "guard": {{"normal": {{"min_length_ratio": 0.6, "max_diff_ratio": 0.5, "min_line_ratio": 0.5, "min_confidence": 40}}}}}}"#
        )
        .expect("write");
        let config = PipelineConfig::from_json_file(file.path()).expect("config");
        assert!(!config.layout_policy);
        assert_eq!(config.guard.normal.min_length_ratio, 0.6);
        assert_eq!(config.guard.micro, crate::guard::GuardProfile::micro());
    }

    #[test]
    fn rejects_zero_capacity_and_bad_ratios() {
        let err = PipelineConfig::from_json_str(r#"{"ledger_capacity": 0}"#).expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = PipelineConfig::from_json_str(
            r#"{"guard": {"micro": {"min_length_ratio": 2, "max_diff_ratio": 0.2, "min_line_ratio": 0.8, "min_confidence": 50}}}"#,
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("guard.micro.min_length_ratio"));
        assert!(matches!(
            PipelineConfig::from_json_file("/nonexistent/livegen.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
