use crate::code::{hash_code, verify_code, CodeGenerator, EntropySource};
use crate::config::OtpPolicy;
use crate::email::CodeSender;
use crate::errors::{DeliveryError, OtpError, ThrottleReason};
use crate::identity::IdentityKey;
use crate::rate_limit::{RateCheck, SendRateLimiter};
use crate::saga::{apply_best_effort, bounded, RollbackGuard, Undo};
use crate::storage::ThrottleStore;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Issues and verifies one-time codes for email identities.
///
/// Holds no per-identity state of its own: every decision is made against the
/// [`ThrottleStore`], whose atomic increments settle races between concurrent
/// calls for the same identity.
pub struct OtpService {
    policy: OtpPolicy,
    storage: Arc<dyn ThrottleStore>,
    sender: Arc<dyn CodeSender>,
    generator: CodeGenerator,
    rate_limiter: SendRateLimiter,
}

#[derive(Default)]
pub struct OtpServiceBuilder {
    policy: Option<OtpPolicy>,
    storage: Option<Arc<dyn ThrottleStore>>,
    sender: Option<Arc<dyn CodeSender>>,
    entropy: Option<Arc<dyn EntropySource>>,
}

impl OtpServiceBuilder {
    pub fn policy(mut self, policy: OtpPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ThrottleStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sender(mut self, sender: Arc<dyn CodeSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = Some(entropy);
        self
    }

    pub fn build(self) -> Result<OtpService, OtpError> {
        let policy = self.policy.ok_or(OtpError::Unconfigured("policy"))?;
        let storage = self.storage.ok_or(OtpError::Unconfigured("store"))?;
        let sender = self.sender.ok_or(OtpError::Unconfigured("sender"))?;
        policy.validate()?;

        let mut generator = CodeGenerator::new(policy.code_length, policy.code_kind);
        if let Some(entropy) = self.entropy {
            generator = generator.with_entropy(entropy);
        }
        let rate_limiter = SendRateLimiter::new(storage.clone(), &policy);

        Ok(OtpService {
            policy,
            storage,
            sender,
            generator,
            rate_limiter,
        })
    }
}

impl OtpService {
    pub fn builder() -> OtpServiceBuilder {
        OtpServiceBuilder::default()
    }

    pub fn new(
        policy: OtpPolicy,
        storage: Arc<dyn ThrottleStore>,
        sender: Arc<dyn CodeSender>,
    ) -> Result<Self, OtpError> {
        Self::builder()
            .policy(policy)
            .storage(storage)
            .sender(sender)
            .build()
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Generates a code for `identity`, stores its digest and delivers it.
    ///
    /// Any failure after the first write rolls back everything this call
    /// wrote, except a send-counter increment that tripped the rate limit.
    #[instrument(skip(self))]
    pub async fn issue(&self, identity: &str) -> Result<(), OtpError> {
        let key = IdentityKey::parse(identity)?;
        let key = key.as_str();
        let deadline = self.policy.store_timeout;

        let cooldown = bounded(deadline, self.storage.cooldown_remaining(key)).await?;
        if !cooldown.is_zero() {
            warn!(identity = key, reason = "cooldown", "OTP issuance throttled");
            return Err(OtpError::Throttled {
                reason: ThrottleReason::Cooldown,
                retry_after: cooldown,
            });
        }

        // Armed from here on: dropping this future rolls back what it wrote.
        let mut saga = RollbackGuard::new(self.storage.clone(), key, deadline);
        if self.rate_limiter.enabled() {
            saga.register(Undo::ClearSendCount);
        }
        match bounded(deadline, self.rate_limiter.check(key)).await {
            Ok(RateCheck::Counted(sent)) => {
                debug!(identity = key, sent, "Send counter incremented");
            }
            Ok(RateCheck::Disabled) => {}
            Err(e) => {
                if let OtpError::Throttled { reason, .. } = &e {
                    warn!(identity = key, reason = %reason, "OTP issuance throttled");
                } else {
                    error!(identity = key, error = %e, "Rate limit check failed");
                }
                saga.disarm();
                return Err(e);
            }
        }

        // A generation failure keeps the send counter.
        let code = match self.generator.generate() {
            Ok(code) => code,
            Err(e) => {
                error!(identity = key, error = %e, "OTP generation failed");
                saga.disarm();
                return Err(e);
            }
        };
        let digest = hash_code(&code, &self.policy.secret);

        saga.register(Undo::DeleteDigest);
        if let Err(e) = bounded(
            deadline,
            self.storage.set_digest(key, &digest, self.policy.ttl),
        )
        .await
        {
            return Err(self.abort(saga, key, "store_digest", e.into()).await);
        }

        // A counter left over from a superseded code must not carry over.
        saga.register(Undo::ResetAttempts);
        if let Err(e) = bounded(deadline, self.storage.reset_attempts(key)).await {
            return Err(self.abort(saga, key, "reset_attempts", e.into()).await);
        }

        if !self.policy.cooldown.is_zero() {
            saga.register(Undo::ClearCooldown);
            if let Err(e) = bounded(
                deadline,
                self.storage.set_cooldown(key, self.policy.cooldown),
            )
            .await
            {
                return Err(self.abort(saga, key, "set_cooldown", e.into()).await);
            }
        }

        let delivery = match self.policy.delivery_timeout {
            Some(limit) => tokio::time::timeout(limit, self.sender.send_code(key, &code))
                .await
                .unwrap_or(Err(DeliveryError::Timeout)),
            None => self.sender.send_code(key, &code).await,
        };
        if let Err(e) = delivery {
            return Err(self.abort(saga, key, "deliver", e.into()).await);
        }

        saga.disarm();
        info!(identity = key, "OTP issued");
        Ok(())
    }

    /// Checks `code` against the digest stored for `identity`.
    ///
    /// Never tells "wrong code" apart from "no code": both are `InvalidCode`.
    /// Only exhausting the attempt budget yields the distinct `TooManyAttempts`.
    #[instrument(skip(self, code))]
    pub async fn verify(&self, identity: &str, code: &str) -> Result<(), OtpError> {
        let key = IdentityKey::parse(identity).map_err(|_| OtpError::InvalidCode)?;
        let key = key.as_str();
        let code = self.generator.canonicalize(code);
        if code.is_empty() {
            return Err(OtpError::InvalidCode);
        }
        let deadline = self.policy.store_timeout;

        let digest = match bounded(deadline, self.storage.get_digest(key)).await? {
            Some(digest) => digest,
            None => {
                debug!(identity = key, "No active OTP");
                return Err(OtpError::InvalidCode);
            }
        };

        let attempts = bounded(
            deadline,
            self.storage.increment_attempts(key, self.policy.ttl),
        )
        .await?;
        let limited = self.policy.attempt_limit_enabled();
        let max = u64::from(self.policy.max_attempts);

        if limited && attempts > max {
            self.invalidate(key).await;
            warn!(identity = key, attempts, "OTP attempts exhausted");
            return Err(OtpError::TooManyAttempts);
        }

        if !verify_code(&code, &digest, &self.policy.secret) {
            if limited && attempts >= max {
                self.invalidate(key).await;
                warn!(identity = key, attempts, "OTP attempts exhausted");
                return Err(OtpError::TooManyAttempts);
            }
            debug!(identity = key, attempts, "OTP mismatch");
            return Err(OtpError::InvalidCode);
        }

        // Consuming the digest is what makes the code single-use, so it is not best-effort.
        bounded(deadline, self.storage.delete_digest(key)).await?;
        apply_best_effort(
            &[Undo::ResetAttempts, Undo::ClearCooldown, Undo::ClearSendCount],
            self.storage.as_ref(),
            key,
            deadline,
        )
        .await;

        info!(identity = key, attempts, "OTP verified");
        Ok(())
    }

    async fn invalidate(&self, key: &str) {
        apply_best_effort(
            &[Undo::DeleteDigest, Undo::ResetAttempts],
            self.storage.as_ref(),
            key,
            self.policy.store_timeout,
        )
        .await;
    }

    async fn abort(
        &self,
        saga: RollbackGuard,
        key: &str,
        stage: &'static str,
        err: OtpError,
    ) -> OtpError {
        error!(identity = key, stage, error = %err, "OTP issuance failed, rolling back");
        saga.rollback().await;
        err
    }
}
