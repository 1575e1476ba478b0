//! Concrete generation sources backed by external services.
pub mod http;
