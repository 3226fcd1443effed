//! Error types for sorted merge get.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmgetError {
    /// No result within the allotted time.
    #[error("sorted merge get timed out after {0:?}")]
    Timeout(Duration),

    #[error("sorted merge get was cancelled")]
    Cancelled,

    #[error("invalid sorted merge get request: {0}")]
    InvalidRequest(String),

    /// The pool has no member to run the request on.
    #[error("no client available")]
    NoClientAvailable,
}

pub type Result<T> = std::result::Result<T, SmgetError>;
