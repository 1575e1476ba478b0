use futures::StreamExt as _;
use tracing::debug;

use crate::errors::SourceError;
use crate::source::{ByteStream, GenerationRequest, GenerationSource};

use super::config::HttpSourceConfig;

const HTTP_SOURCE: &str = "http";

/// Generation source that streams a producer's HTTP response body.
pub struct HttpSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        if config.endpoint.trim().is_empty() {
            return Err(SourceError::Config(
                "HTTP source endpoint must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, SourceError> {
        Self::new(HttpSourceConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl GenerationSource for HttpSource {
    fn id(&self) -> &str {
        HTTP_SOURCE
    }

    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream, SourceError> {
        debug!(session_id = %request.session_id, project = %request.project, endpoint = %self.config.endpoint, "opening HTTP generation stream");

        let mut http_req = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        if let Some(key) = self.config.api_key.as_deref() {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| SourceError::transport(HTTP_SOURCE, format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SourceError::status(
                HTTP_SOURCE,
                format!("generation request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| SourceError::transport(HTTP_SOURCE, format!("stream read failed: {e}")))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_is_a_config_error() {
        let err = HttpSource::new(HttpSourceConfig::new("  ")).err().expect("error");
        assert!(matches!(err, SourceError::Config(_)));
    }

    #[tokio::test]
    async fn env_gated_smoke_open_if_endpoint_present() {
        if std::env::var("LIVEGEN_ENDPOINT")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping HTTP source smoke test (LIVEGEN_ENDPOINT missing)");
            return;
        }
        let source = HttpSource::from_env().expect("source");
        let request = GenerationRequest {
            session_id: uuid::Uuid::new_v4(),
            project: "smoke".into(),
            instruction: "Say hello".into(),
            baseline: None,
        };
        let result = source.open(&request).await;
        assert!(result.is_ok(), "HTTP source smoke failed: {:?}", result.err());
    }
}
