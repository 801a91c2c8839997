use crate::config::{OtpConfig, StorageType};
use crate::errors::{OtpError, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod redis;

pub use self::memory::{Clock, IdentityState, InMemoryStore, ManualClock, SystemClock};
pub use self::redis::RedisStore;

/// Result of an atomic send-counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCount {
    pub count: u64,
    /// Time left in the current rate window.
    pub retry_after: Duration,
}

/// Per-identity expiring counters and flags backing the OTP engine.
///
/// Every operation is scoped to one identity key. Increments must be atomic
/// with respect to concurrent callers on the same key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    async fn cooldown_remaining(&self, key: &str) -> Result<Duration, StoreError>;
    async fn set_cooldown(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn clear_cooldown(&self, key: &str) -> Result<(), StoreError>;

    async fn increment_send_count(&self, key: &str, window: Duration)
        -> Result<SendCount, StoreError>;
    async fn clear_send_count(&self, key: &str) -> Result<(), StoreError>;

    async fn set_digest(&self, key: &str, digest: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn get_digest(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn delete_digest(&self, key: &str) -> Result<(), StoreError>;

    async fn increment_attempts(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
    async fn reset_attempts(&self, key: &str) -> Result<(), StoreError>;
}

/// Builds the store selected by `config.storage_type`.
pub fn from_config(config: &OtpConfig) -> Result<Arc<dyn ThrottleStore>, OtpError> {
    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageType::Redis => Ok(Arc::new(RedisStore::new(&config.redis_url)?)),
    }
}
