//! Crate-wide error type.
//!
//! Every fallible public operation returns [`Error`]. The HTTP layer maps
//! each variant onto a status code; everything below the HTTP layer only
//! constructs variants and never thinks in status codes.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request rejected before a job was created.
    #[error("{0}")]
    Validation(String),

    #[error("rate limit exceeded, try again later")]
    RateLimitExceeded,

    /// The external extraction tool failed or produced nothing usable.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("file size {size} exceeds the {limit} byte limit")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("post-processing failed: {0}")]
    PostProcess(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The resource exists but is not in a state the request needs.
    #[error("{0}")]
    NotReady(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn post_process(msg: impl Into<String>) -> Self {
        Self::PostProcess(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_file(path: PathBuf) -> Self {
        Self::NotFound(format!("file {}", path.display()))
    }
}
