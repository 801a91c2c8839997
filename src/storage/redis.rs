use crate::errors::StoreError;
use crate::storage::{SendCount, ThrottleStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;

/// INCR that attaches the expiry in the same round trip, so a counter can
/// never be left without a TTL. Returns `{count, pttl}`.
const INCR_WITH_TTL: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

pub struct RedisStore {
    client: redis::Client,
    incr_with_ttl: Script,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            incr_with_ttl: Script::new(INCR_WITH_TTL),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<(u64, i64), StoreError> {
        let mut conn = self.conn().await?;
        let (count, pttl): (u64, i64) = self
            .incr_with_ttl
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok((count, pttl))
    }

    async fn delete(&self, key: String) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

fn digest_key(email: &str) -> String {
    format!("otp:digest:{}", email)
}

fn cooldown_key(email: &str) -> String {
    format!("otp:cooldown:{}", email)
}

fn send_key(email: &str) -> String {
    format!("otp:send:{}", email)
}

fn attempts_key(email: &str) -> String {
    format!("otp:attempts:{}", email)
}

/// Redis rejects a zero expiry, so sub-millisecond TTLs round up.
fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn from_pttl(pttl: i64) -> Duration {
    if pttl > 0 {
        Duration::from_millis(pttl as u64)
    } else {
        Duration::ZERO
    }
}

#[async_trait]
impl ThrottleStore for RedisStore {
    async fn cooldown_remaining(&self, email: &str) -> Result<Duration, StoreError> {
        let mut conn = self.conn().await?;
        let pttl: i64 = conn.pttl(cooldown_key(email)).await?;
        Ok(from_pttl(pttl))
    }

    async fn set_cooldown(&self, email: &str, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            return self.delete(cooldown_key(email)).await;
        }
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(cooldown_key(email))
            .arg(1)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_cooldown(&self, email: &str) -> Result<(), StoreError> {
        self.delete(cooldown_key(email)).await
    }

    async fn increment_send_count(
        &self,
        email: &str,
        window: Duration,
    ) -> Result<SendCount, StoreError> {
        let (count, pttl) = self.incr(&send_key(email), window).await?;
        Ok(SendCount {
            count,
            retry_after: from_pttl(pttl),
        })
    }

    async fn clear_send_count(&self, email: &str) -> Result<(), StoreError> {
        self.delete(send_key(email)).await
    }

    async fn set_digest(&self, email: &str, digest: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(digest_key(email))
            .arg(digest)
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_digest(&self, email: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let digest: Option<String> = conn.get(digest_key(email)).await?;
        Ok(digest)
    }

    async fn delete_digest(&self, email: &str) -> Result<(), StoreError> {
        self.delete(digest_key(email)).await
    }

    async fn increment_attempts(&self, email: &str, ttl: Duration) -> Result<u64, StoreError> {
        let (count, _) = self.incr(&attempts_key(email), ttl).await?;
        Ok(count)
    }

    async fn reset_attempts(&self, email: &str) -> Result<(), StoreError> {
        self.delete(attempts_key(email)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced_per_record() {
        let email = "a@b.c";
        let keys = [
            digest_key(email),
            cooldown_key(email),
            send_key(email),
            attempts_key(email),
        ];
        assert_eq!(keys[0], "otp:digest:a@b.c");
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_ttl_conversions() {
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(from_pttl(-2), Duration::ZERO);
        assert_eq!(from_pttl(-1), Duration::ZERO);
        assert_eq!(from_pttl(1500), Duration::from_millis(1500));
    }
}
