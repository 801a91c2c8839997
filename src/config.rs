use crate::errors::OtpError;
use std::time::Duration;

/// Anti-abuse policy applied by the engine on every issue/verify call.
#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub ttl: Duration,
    pub cooldown: Duration,
    /// Codes allowed per `rate_window`; 0 disables rate limiting.
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// Verification attempts per code; 0 disables attempt limiting.
    pub max_attempts: u32,
    pub secret: String,
    pub code_length: usize,
    pub code_kind: CodeKind,
    pub store_timeout: Option<Duration>,
    pub delivery_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Numeric,
    Alphanumeric,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StorageType {
    Memory,
    Redis,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            cooldown: Duration::from_secs(60),
            rate_limit: 5,
            rate_window: Duration::from_secs(300),
            max_attempts: 5,
            secret: "otp-dev-secret".to_string(),
            code_length: 6,
            code_kind: CodeKind::Numeric,
            store_timeout: None,
            delivery_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl OtpPolicy {
    pub fn attempt_limit_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    pub fn validate(&self) -> Result<(), OtpError> {
        if self.secret.trim().is_empty() {
            return Err(OtpError::Unconfigured("secret"));
        }
        if self.ttl.is_zero() {
            return Err(OtpError::Config("OTP ttl must be positive".to_string()));
        }
        if !(4..=10).contains(&self.code_length) {
            return Err(OtpError::Config(
                "OTP length must be between 4 and 10".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub policy: OtpPolicy,
    pub storage_type: StorageType,
    pub redis_url: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_starttls: bool,
    pub smtp_username: String,
    pub smtp_password: String,
    pub mail_from: String,
    pub mail_from_name: String,
    pub mail_subject: String,
    pub app_name: String,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            policy: OtpPolicy::default(),
            storage_type: StorageType::Memory,
            redis_url: "redis://127.0.0.1/".to_string(),
            smtp_server: "localhost".to_string(),
            smtp_port: 1025,
            smtp_starttls: true,
            smtp_username: "".to_string(),
            smtp_password: "".to_string(),
            mail_from: "noreply@example.com".to_string(),
            mail_from_name: "Account Verification".to_string(),
            mail_subject: "Your verification code".to_string(),
            app_name: "Account Verification".to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, OtpError> {
    raw.map(|val| {
        val.trim()
            .parse()
            .map_err(|_| OtpError::Config(format!("Invalid {}", name)))
    })
    .transpose()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, OtpError> {
    parse_var(name, std::env::var(name).ok())
}

fn env_secs(name: &str) -> Result<Option<Duration>, OtpError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}

fn env_millis(name: &str) -> Result<Option<Duration>, OtpError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

impl OtpConfig {
    pub fn from_env() -> Result<Self, OtpError> {
        let mut config = Self::default();
        let policy = &mut config.policy;

        if let Some(ttl) = env_secs("OTP_TTL_SECONDS")? {
            policy.ttl = ttl;
        }
        // The rate window follows the ttl unless set explicitly.
        policy.rate_window = env_secs("OTP_RATE_WINDOW_SECONDS")?.unwrap_or(policy.ttl);
        if let Some(cooldown) = env_secs("OTP_COOLDOWN_SECONDS")? {
            policy.cooldown = cooldown;
        }
        if let Some(max) = env_parse("OTP_MAX_ATTEMPTS")? {
            policy.max_attempts = max;
        }
        if let Some(limit) = env_parse("OTP_RATE_LIMIT")? {
            policy.rate_limit = limit;
        }
        if let Some(len) = env_parse("OTP_LENGTH")? {
            policy.code_length = len;
        }
        if let Ok(val) = std::env::var("OTP_TYPE") {
            policy.code_kind = match val.to_lowercase().as_str() {
                "numeric" => CodeKind::Numeric,
                "alphanumeric" => CodeKind::Alphanumeric,
                _ => {
                    return Err(OtpError::Config(
                        "Invalid OTP_TYPE: must be 'numeric' or 'alphanumeric'".to_string(),
                    ))
                }
            };
        }
        if let Some(timeout) = env_millis("OTP_STORE_TIMEOUT_MS")? {
            policy.store_timeout = Some(timeout).filter(|t| !t.is_zero());
        }
        if let Some(timeout) = env_millis("OTP_DELIVERY_TIMEOUT_MS")? {
            policy.delivery_timeout = Some(timeout).filter(|t| !t.is_zero());
        }

        policy.secret = std::env::var("OTP_SECRET")
            .map(|s| s.trim().to_string())
            .map_err(|_| OtpError::Config("OTP_SECRET must be set".to_string()))?;

        if let Ok(val) = std::env::var("STORAGE_TYPE") {
            config.storage_type = match val.to_lowercase().as_str() {
                "memory" => StorageType::Memory,
                "redis" => StorageType::Redis,
                _ => {
                    return Err(OtpError::Config(
                        "Invalid STORAGE_TYPE: must be 'memory' or 'redis'".to_string(),
                    ))
                }
            };
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis_url = url;
        } else if let Ok(host) = std::env::var("REDIS_HOST") {
            let port = std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
            config.redis_url = format!("redis://{}:{}/", host, port);
        } else if config.storage_type == StorageType::Redis {
            return Err(OtpError::Config(
                "REDIS_URL or REDIS_HOST must be set".to_string(),
            ));
        }

        if let Ok(host) = std::env::var("SMTP_HOST") {
            config.smtp_server = host;
        }
        if let Some(port) = env_parse("SMTP_PORT")? {
            config.smtp_port = port;
        }
        if let Some(starttls) = env_parse("SMTP_STARTTLS")? {
            config.smtp_starttls = starttls;
        }
        if let Ok(val) = std::env::var("SMTP_USERNAME") {
            config.smtp_username = val;
        }
        if let Ok(val) = std::env::var("SMTP_PASSWORD") {
            config.smtp_password = val;
        }
        if let Ok(val) = std::env::var("SMTP_MAIL_FROM") {
            config.mail_from = val;
        }
        if let Ok(val) = std::env::var("SMTP_MAIL_FROM_NAME") {
            config.mail_from_name = val;
        }
        if let Ok(val) = std::env::var("SMTP_SUBJECT") {
            config.mail_subject = val;
        }
        if let Ok(val) = std::env::var("OTP_APP_NAME") {
            config.app_name = val;
        }

        config.policy.validate()?;
        Ok(config)
    }
}
