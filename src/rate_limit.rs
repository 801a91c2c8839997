use crate::config::OtpPolicy;
use crate::errors::{OtpError, ThrottleReason};
use crate::storage::ThrottleStore;
use std::sync::Arc;
use std::time::Duration;

/// Caps the number of codes issued per identity within the rate window.
pub struct SendRateLimiter {
    storage: Arc<dyn ThrottleStore>,
    limit: u32,
    window: Duration,
}

/// What a rate check did to the send counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCheck {
    Disabled,
    Counted(u64),
}

impl SendRateLimiter {
    pub fn new(storage: Arc<dyn ThrottleStore>, policy: &OtpPolicy) -> Self {
        Self {
            storage,
            limit: policy.rate_limit,
            window: policy.rate_window,
        }
    }

    pub fn enabled(&self) -> bool {
        self.limit > 0 && !self.window.is_zero()
    }

    /// Counts one issuance against the window. An exceeded limit is reported as
    /// `Throttled` and the increment stays in place; a store failure is
    /// reported as `Storage`.
    pub async fn check(&self, key: &str) -> Result<RateCheck, OtpError> {
        if !self.enabled() {
            return Ok(RateCheck::Disabled);
        }

        let sent = self.storage.increment_send_count(key, self.window).await?;
        if sent.count > u64::from(self.limit) {
            return Err(OtpError::Throttled {
                reason: ThrottleReason::RateLimit,
                retry_after: sent.retry_after,
            });
        }
        Ok(RateCheck::Counted(sent.count))
    }
}
