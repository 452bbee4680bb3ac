//! Shared key-value backend used by the response cache and the quota tracker.
//!
//! Both consumers hold an `Option<Arc<dyn SharedStore>>`: `None` is the disabled
//! variant, `Some` is backed by Redis in production. Callers treat every
//! `StoreError` as a degradation, never as a user-facing failure.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod redis;

/// Prefix shared by every key this service writes.
pub const KEY_NAMESPACE: &str = "resume_enhancer";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    #[error("Value at '{key}' is not an integer: {value}")]
    NotAnInteger { key: String, value: String },
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increments the integer at `key` (missing keys count as 0) and
    /// returns the new value. `retain_for` bounds how long the key lives in storage.
    async fn increment(&self, key: &str, retain_for: Duration) -> Result<i64, StoreError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Deletes every key starting with `prefix` and returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}

/// Escapes Redis glob metacharacters so a prefix matches literally in `SCAN MATCH`.
pub fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
