use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why an issuance was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    Cooldown,
    RateLimit,
}

impl ThrottleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleReason::Cooldown => "cooldown",
            ThrottleReason::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the backing key-value store. Never carries business outcomes.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store operation timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum OtpError {
    #[error("Invalid identity")]
    InvalidIdentity,

    #[error("Invalid OTP")]
    InvalidCode,

    #[error("OTP throttled: {reason}")]
    Throttled {
        reason: ThrottleReason,
        retry_after: Duration,
    },

    #[error("Too many failed attempts")]
    TooManyAttempts,

    #[error("Code generation failed: {0}")]
    Generation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("OTP service not configured: missing {0}")]
    Unconfigured(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl OtpError {
    /// Wait hint for throttled issuance.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OtpError::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// True for failures of the service itself rather than of the caller's input.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            OtpError::Generation(_)
                | OtpError::Storage(_)
                | OtpError::Delivery(_)
                | OtpError::Unconfigured(_)
                | OtpError::Config(_)
        )
    }
}
