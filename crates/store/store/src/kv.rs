//! Key-value store trait.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::StoreResult;

/// Trait for key-value storage backends.
///
/// Values are JSON documents. The store makes no transactional guarantees
/// beyond single-key atomicity; callers that need read-modify-write safety
/// across concurrent writers go through [`compare_and_swap`].
///
/// [`compare_and_swap`]: KeyValueStore::compare_and_swap
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Gets the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// A `ttl` of `None` means the value does not expire.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Deletes the value under `key`. Returns whether a value was present.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically replaces the value under `key` with `new`, but only if the
    /// current value equals `expected`.
    ///
    /// `expected = None` asserts the key is absent, so a successful swap with
    /// `None` is an atomic insert. Returns whether the swap was applied. The
    /// previous TTL, if any, is not carried over.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> StoreResult<bool>;
}
