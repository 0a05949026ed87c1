//! Errors raised while talking to a price source.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<SourceError>,
    },

    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("all {count} endpoints failed, last error: {last}")]
    AllEndpointsFailed {
        count: usize,
        last: Box<SourceError>,
    },
}

impl SourceError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}
