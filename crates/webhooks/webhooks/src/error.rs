//! Webhook error types.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
///
/// Only registry-level input errors reach callers. Transport and protocol
/// failures during a delivery attempt are not errors; they drive the retry
/// state machine on the [`Delivery`](crate::Delivery) record instead.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Malformed registration or update input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation referenced an unknown subscriber or delivery.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent writers kept invalidating an index update.
    #[error("concurrent update conflict on {0}")]
    Conflict(String),

    /// Persistence substrate failure.
    #[error("store error: {0}")]
    Store(#[from] careline_store::StoreError),

    /// Payload could not be serialized.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}
