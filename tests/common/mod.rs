#![allow(dead_code)]

use async_trait::async_trait;
use email_otp_engine::{
    CodeSender, DeliveryError, InMemoryStore, ManualClock, OtpPolicy, OtpService,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SECRET: &str = "integration-test-secret";

/// Records every delivered code; can be switched to fail or stall.
#[derive(Default)]
pub struct TestCodeSender {
    pub sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    stall: Option<Duration>,
}

impl TestCodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn last_code(&self, recipient: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == recipient)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CodeSender for TestCodeSender {
    async fn send_code(&self, recipient: &str, code: &str) -> Result<(), DeliveryError> {
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Transport("mailbox unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), code.to_string()));
        Ok(())
    }
}

pub fn policy() -> OtpPolicy {
    OtpPolicy {
        ttl: Duration::from_secs(300),
        cooldown: Duration::from_secs(60),
        rate_limit: 5,
        rate_window: Duration::from_secs(3600),
        max_attempts: 3,
        secret: SECRET.to_string(),
        ..OtpPolicy::default()
    }
}

pub struct Harness {
    pub service: Arc<OtpService>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<TestCodeSender>,
}

pub fn harness(policy: OtpPolicy) -> Harness {
    harness_with_sender(policy, TestCodeSender::new())
}

pub fn harness_with_sender(policy: OtpPolicy, sender: TestCodeSender) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let sender = Arc::new(sender);
    let service = Arc::new(
        OtpService::new(policy, store.clone(), sender.clone()).expect("valid policy"),
    );
    Harness {
        service,
        store,
        clock,
        sender,
    }
}
