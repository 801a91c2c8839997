#![doc = include_str!("../README.md")]

#[cfg(feature = "axum")]
pub mod axum_api;
pub mod code;
pub mod config;
pub mod email;
pub mod errors;
pub mod identity;
pub mod rate_limit;
pub mod saga;
pub mod service;
pub mod storage;

pub use config::{CodeKind, OtpConfig, OtpPolicy, StorageType};
pub use email::{CodeSender, LettreCodeSender};
pub use errors::{DeliveryError, OtpError, StoreError, ThrottleReason};
pub use identity::IdentityKey;
pub use service::{OtpService, OtpServiceBuilder};
pub use storage::{InMemoryStore, ManualClock, RedisStore, SendCount, ThrottleStore};
