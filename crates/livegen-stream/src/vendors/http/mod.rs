//! Streaming HTTP generation source.
//!
//! POSTs the [`GenerationRequest`](crate::source::GenerationRequest) as JSON
//! and hands the response body to the pipeline unchanged.
mod config;
mod source;

pub use config::HttpSourceConfig;
pub use source::HttpSource;
