use std::time::Duration;

use crate::errors::SourceError;

/// Connection settings for [`HttpSource`](super::HttpSource).
#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    /// Full URL of the streaming generation endpoint.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Whole-request timeout, streaming included.
    pub timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `LIVEGEN_ENDPOINT`, `LIVEGEN_API_KEY` and
    /// `LIVEGEN_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, SourceError> {
        let endpoint = std::env::var("LIVEGEN_ENDPOINT").unwrap_or_default();
        if endpoint.trim().is_empty() {
            return Err(SourceError::Config(
                "missing LIVEGEN_ENDPOINT for the HTTP source".into(),
            ));
        }
        let mut config = Self::new(endpoint.trim());
        if let Ok(key) = std::env::var("LIVEGEN_API_KEY")
            && !key.trim().is_empty()
        {
            config = config.api_key(key.trim());
        }
        if let Ok(raw) = std::env::var("LIVEGEN_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                SourceError::Config(format!("LIVEGEN_TIMEOUT_SECS must be a whole number, got '{raw}'"))
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
