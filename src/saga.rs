use crate::errors::StoreError;
use crate::storage::ThrottleStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Reversal of one forward write made during issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undo {
    ClearSendCount,
    DeleteDigest,
    ResetAttempts,
    ClearCooldown,
}

impl Undo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Undo::ClearSendCount => "clear_send_count",
            Undo::DeleteDigest => "delete_digest",
            Undo::ResetAttempts => "reset_attempts",
            Undo::ClearCooldown => "clear_cooldown",
        }
    }

    async fn apply(&self, store: &dyn ThrottleStore, key: &str) -> Result<(), StoreError> {
        match self {
            Undo::ClearSendCount => store.clear_send_count(key).await,
            Undo::DeleteDigest => store.delete_digest(key).await,
            Undo::ResetAttempts => store.reset_attempts(key).await,
            Undo::ClearCooldown => store.clear_cooldown(key).await,
        }
    }
}

/// Undo log for one issuance.
///
/// A step is registered before its forward write is attempted, so a write
/// that fails or times out after reaching the store is still reversed.
#[derive(Debug, Default)]
pub struct Compensation {
    steps: Vec<Undo>,
}

impl Compensation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, undo: Undo) {
        self.steps.push(undo);
    }

    pub fn steps(&self) -> &[Undo] {
        &self.steps
    }

    /// Replays the log newest-first. Failures are logged and skipped so the
    /// caller keeps reporting the error that triggered the rollback.
    pub async fn rollback(self, store: &dyn ThrottleStore, key: &str, deadline: Option<Duration>) {
        let steps: Vec<Undo> = self.steps.into_iter().rev().collect();
        apply_best_effort(&steps, store, key, deadline).await;
    }
}

/// Undo log bound to its store and identity, armed until the issuance settles.
///
/// If the owning future is dropped while armed (the caller gave up, timed
/// out or disconnected), the registered steps are replayed on a spawned task.
pub struct RollbackGuard {
    log: Compensation,
    store: Arc<dyn ThrottleStore>,
    key: String,
    deadline: Option<Duration>,
    armed: bool,
}

impl RollbackGuard {
    pub fn new(store: Arc<dyn ThrottleStore>, key: &str, deadline: Option<Duration>) -> Self {
        Self {
            log: Compensation::new(),
            store,
            key: key.to_string(),
            deadline,
            armed: true,
        }
    }

    pub fn register(&mut self, undo: Undo) {
        self.log.register(undo);
    }

    /// Keeps every write made so far.
    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Replays the log now, in the caller's task.
    pub async fn rollback(mut self) {
        let log = std::mem::take(&mut self.log);
        self.armed = false;
        log.rollback(self.store.as_ref(), &self.key, self.deadline)
            .await;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if !self.armed || self.log.steps().is_empty() {
            return;
        }
        let log = std::mem::take(&mut self.log);
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let deadline = self.deadline;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(identity = %key, "OTP issuance cancelled, rolling back");
                handle.spawn(async move {
                    log.rollback(store.as_ref(), &key, deadline).await;
                });
            }
            Err(_) => {
                warn!(identity = %key, "OTP issuance cancelled outside a runtime, state left behind");
            }
        }
    }
}

/// Applies `steps` in order, logging and skipping any that fail.
pub async fn apply_best_effort(
    steps: &[Undo],
    store: &dyn ThrottleStore,
    key: &str,
    deadline: Option<Duration>,
) {
    for undo in steps {
        if let Err(e) = bounded(deadline, undo.apply(store, key)).await {
            warn!(
                identity = key,
                step = undo.as_str(),
                error = %e,
                "OTP cleanup step failed"
            );
        }
    }
}

/// Runs a store call under an optional deadline.
pub(crate) async fn bounded<T, E, F>(deadline: Option<Duration>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout.into())),
        None => fut.await,
    }
}
