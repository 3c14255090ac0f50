//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Value could not be serialized or deserialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}
