use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;
use livegen_core::Artifact;
use serde::{Deserialize, Serialize};

use crate::errors::SourceError;
use crate::project::ProjectId;

pub type ByteStream = Pin<Box<dyn futures::Stream<Item = Result<Bytes, SourceError>> + Send + 'static>>;

/// What a generation source is asked to produce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub session_id: uuid::Uuid,
    pub project: ProjectId,
    pub instruction: String,
    /// Current known-good artifact the producer edits, if any.
    pub baseline: Option<Artifact>,
}

/// Producer of a raw generation byte stream.
#[async_trait::async_trait]
pub trait GenerationSource: Send + Sync {
    /// Short identifier used in logs and errors.
    fn id(&self) -> &str;

    async fn open(&self, request: &GenerationRequest) -> Result<ByteStream, SourceError>;
}

/// Serves recorded chunks; every `open` replays the same bytes.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    chunks: Vec<Bytes>,
    stall_at_end: bool,
}

impl ReplaySource {
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            stall_at_end: false,
        }
    }

    /// Splits `text` into chunks of at most `chunk_size` bytes.
    pub fn from_text(text: &str, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self::from_chunks(
            text.as_bytes()
                .chunks(chunk_size)
                .map(Bytes::copy_from_slice)
                .collect::<Vec<_>>(),
        )
    }

    /// Keeps the stream open after the last chunk instead of closing it.
    pub fn stalled(mut self) -> Self {
        self.stall_at_end = true;
        self
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait::async_trait]
impl GenerationSource for ReplaySource {
    fn id(&self) -> &str {
        "replay"
    }

    async fn open(&self, _request: &GenerationRequest) -> Result<ByteStream, SourceError> {
        let recorded = stream::iter(self.chunks.clone().into_iter().map(Ok));
        if self.stall_at_end {
            Ok(Box::pin(recorded.chain(stream::pending())))
        } else {
            Ok(Box::pin(recorded))
        }
    }
}
