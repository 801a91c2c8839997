use crate::errors::StoreError;
use crate::storage::{SendCount, ThrottleStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

#[derive(Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Minimum gap between two sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Tables {
    digests: HashMap<String, Expiring<String>>,
    cooldowns: HashMap<String, Instant>,
    send_counts: HashMap<String, Expiring<u64>>,
    attempts: HashMap<String, Expiring<u64>>,
    next_sweep: Option<Instant>,
}

impl Tables {
    /// Drops every expired entry, at most once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.digests.retain(|_, e| e.live(now));
        self.cooldowns.retain(|_, at| *at > now);
        self.send_counts.retain(|_, e| e.live(now));
        self.attempts.retain(|_, e| e.live(now));
        self.next_sweep = Some(now + SWEEP_INTERVAL);
    }

    fn len(&self) -> usize {
        self.digests.len() + self.cooldowns.len() + self.send_counts.len() + self.attempts.len()
    }
}

/// Live view of everything stored for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityState {
    pub digest: Option<String>,
    pub cooldown: Duration,
    pub send_count: u64,
    pub attempts: u64,
}

impl IdentityState {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Process-local store. All tables share one lock, which makes every
/// increment atomic.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("Lock poisoned".into()))
    }

    /// Write access; expired entries are swept out on the way in.
    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::Backend("Lock poisoned".into()))?;
        tables.sweep(self.clock.now());
        Ok(tables)
    }

    /// Number of entries held across all tables, expired or not.
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn snapshot(&self, key: &str) -> Result<IdentityState, StoreError> {
        let tables = self.read()?;
        let now = self.clock.now();
        Ok(IdentityState {
            digest: tables
                .digests
                .get(key)
                .filter(|e| e.live(now))
                .map(|e| e.value.clone()),
            cooldown: remaining(tables.cooldowns.get(key).copied(), now),
            send_count: live_count(tables.send_counts.get(key), now),
            attempts: live_count(tables.attempts.get(key), now),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn remaining(expires_at: Option<Instant>, now: Instant) -> Duration {
    expires_at
        .map(|at| at.saturating_duration_since(now))
        .unwrap_or_default()
}

fn live_count(entry: Option<&Expiring<u64>>, now: Instant) -> u64 {
    entry.filter(|e| e.live(now)).map(|e| e.value).unwrap_or(0)
}

/// Increments `key`, starting a fresh window of `ttl` when absent or expired.
fn bump(
    map: &mut HashMap<String, Expiring<u64>>,
    key: &str,
    ttl: Duration,
    now: Instant,
) -> Expiring<u64> {
    let entry = map.entry(key.to_string()).or_insert(Expiring {
        value: 0,
        expires_at: now + ttl,
    });
    if !entry.live(now) {
        entry.value = 0;
        entry.expires_at = now + ttl;
    }
    entry.value += 1;
    entry.clone()
}

#[async_trait]
impl ThrottleStore for InMemoryStore {
    async fn cooldown_remaining(&self, key: &str) -> Result<Duration, StoreError> {
        let tables = self.read()?;
        Ok(remaining(tables.cooldowns.get(key).copied(), self.clock.now()))
    }

    async fn set_cooldown(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if ttl.is_zero() {
            tables.cooldowns.remove(key);
        } else {
            tables
                .cooldowns
                .insert(key.to_string(), self.clock.now() + ttl);
        }
        Ok(())
    }

    async fn clear_cooldown(&self, key: &str) -> Result<(), StoreError> {
        self.write()?.cooldowns.remove(key);
        Ok(())
    }

    async fn increment_send_count(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<SendCount, StoreError> {
        let mut tables = self.write()?;
        let now = self.clock.now();
        let entry = bump(&mut tables.send_counts, key, window, now);
        Ok(SendCount {
            count: entry.value,
            retry_after: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn clear_send_count(&self, key: &str) -> Result<(), StoreError> {
        self.write()?.send_counts.remove(key);
        Ok(())
    }

    async fn set_digest(&self, key: &str, digest: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let expires_at = self.clock.now() + ttl;
        tables.digests.insert(
            key.to_string(),
            Expiring {
                value: digest.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_digest(&self, key: &str) -> Result<Option<String>, StoreError> {
        let tables = self.read()?;
        let now = self.clock.now();
        Ok(tables
            .digests
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone()))
    }

    async fn delete_digest(&self, key: &str) -> Result<(), StoreError> {
        self.write()?.digests.remove(key);
        Ok(())
    }

    async fn increment_attempts(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let now = self.clock.now();
        Ok(bump(&mut tables.attempts, key, ttl, now).value)
    }

    async fn reset_attempts(&self, key: &str) -> Result<(), StoreError> {
        self.write()?.attempts.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "test@example.com";

    fn store_with_clock() -> (InMemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (InMemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_digest_flow() {
        let (storage, clock) = store_with_clock();

        storage
            .set_digest(KEY, "abc", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(storage.get_digest(KEY).await.unwrap(), Some("abc".into()));

        storage.delete_digest(KEY).await.unwrap();
        assert_eq!(storage.get_digest(KEY).await.unwrap(), None);

        storage
            .set_digest(KEY, "def", Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60));
        assert_eq!(storage.get_digest(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cooldown_counts_down() {
        let (storage, clock) = store_with_clock();
        assert_eq!(storage.cooldown_remaining(KEY).await.unwrap(), Duration::ZERO);

        storage
            .set_cooldown(KEY, Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(45));
        assert_eq!(
            storage.cooldown_remaining(KEY).await.unwrap(),
            Duration::from_secs(15)
        );

        clock.advance(Duration::from_secs(15));
        assert_eq!(storage.cooldown_remaining(KEY).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_send_window_rolls_over() {
        let (storage, clock) = store_with_clock();
        let window = Duration::from_secs(60);

        let first = storage.increment_send_count(KEY, window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.retry_after, window);

        clock.advance(Duration::from_secs(20));
        let second = storage.increment_send_count(KEY, window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.retry_after, Duration::from_secs(40));

        clock.advance(Duration::from_secs(40));
        let fresh = storage.increment_send_count(KEY, window).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.retry_after, window);
    }

    #[tokio::test]
    async fn test_attempts_expire_with_ttl() {
        let (storage, clock) = store_with_clock();
        let ttl = Duration::from_secs(300);

        assert_eq!(storage.increment_attempts(KEY, ttl).await.unwrap(), 1);
        assert_eq!(storage.increment_attempts(KEY, ttl).await.unwrap(), 2);

        clock.advance(ttl);
        assert_eq!(storage.snapshot(KEY).unwrap().attempts, 0);
        assert_eq!(storage.increment_attempts(KEY, ttl).await.unwrap(), 1);

        storage.reset_attempts(KEY).await.unwrap();
        assert_eq!(storage.snapshot(KEY).unwrap().attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let storage = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move {
                    storage
                        .increment_send_count(KEY, Duration::from_secs(60))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(storage.snapshot(KEY).unwrap().send_count, 64);
    }

    #[tokio::test]
    async fn test_expired_entries_are_swept() {
        let (storage, clock) = store_with_clock();
        let ttl = Duration::from_secs(60);

        storage.set_digest(KEY, "abc", ttl).await.unwrap();
        storage.set_cooldown(KEY, ttl).await.unwrap();
        storage.increment_send_count(KEY, ttl).await.unwrap();
        storage.increment_attempts(KEY, ttl).await.unwrap();
        assert_eq!(storage.entry_count().unwrap(), 4);

        clock.advance(Duration::from_secs(61));
        assert_eq!(storage.cooldown_remaining(KEY).await.unwrap(), Duration::ZERO);

        // Any write for another identity collects the stale ones.
        storage
            .set_cooldown("other@example.com", ttl)
            .await
            .unwrap();
        assert_eq!(storage.entry_count().unwrap(), 1);
        assert!(storage.snapshot(KEY).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let (storage, clock) = store_with_clock();

        storage
            .set_digest(KEY, "abc", Duration::from_secs(300))
            .await
            .unwrap();
        storage
            .set_cooldown(KEY, Duration::from_secs(10))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(45));
        storage
            .increment_attempts(KEY, Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(storage.entry_count().unwrap(), 2);
        assert_eq!(storage.get_digest(KEY).await.unwrap(), Some("abc".into()));
    }

    #[tokio::test]
    async fn test_snapshot_of_unknown_identity_is_empty() {
        let storage = InMemoryStore::new();
        assert!(storage.snapshot("nobody@example.com").unwrap().is_empty());
    }
}
