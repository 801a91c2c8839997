use crate::config::OtpConfig;
use crate::errors::DeliveryError;
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// Delivers a freshly issued code to its identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, recipient: &str, code: &str) -> Result<(), DeliveryError>;
}

pub struct LettreCodeSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
    subject: String,
    app_name: String,
    validity: Duration,
}

impl LettreCodeSender {
    pub fn new(config: &OtpConfig) -> Result<Self, DeliveryError> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        // Port 1025 is a local mail catcher and speaks plain SMTP.
        let mailer = if config.smtp_port == 1025 {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_server)
                .port(config.smtp_port)
                .build()
        } else if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?
                .port(config.smtp_port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
                .map_err(|e| DeliveryError::Transport(e.to_string()))?
                .port(config.smtp_port)
                .credentials(creds)
                .build()
        };

        Ok(Self {
            mailer,
            from_email: config.mail_from.clone(),
            from_name: config.mail_from_name.clone(),
            subject: config.mail_subject.clone(),
            app_name: config.app_name.clone(),
            validity: config.policy.ttl,
        })
    }
}

/// Plain-text body naming the app and how long the code stays valid.
pub fn render_body(app_name: &str, code: &str, validity: Duration) -> String {
    let minutes = (validity.as_secs() / 60).max(1);
    format!(
        "Your {} verification code is: {}\n\
         This code expires in {} minute{}.\n\
         If you did not request it, you can ignore this email.\n",
        app_name,
        code,
        minutes,
        if minutes == 1 { "" } else { "s" }
    )
}

#[async_trait]
impl CodeSender for LettreCodeSender {
    async fn send_code(&self, recipient: &str, code: &str) -> Result<(), DeliveryError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.from_name, self.from_email)
                    .parse()
                    .map_err(|e| DeliveryError::Address(format!("from: {}", e)))?,
            )
            .to(recipient
                .parse()
                .map_err(|e| DeliveryError::Address(format!("to: {}", e)))?)
            .subject(self.subject.clone())
            .body(render_body(&self.app_name, code, self.validity))
            .map_err(|e| DeliveryError::Message(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(())
    }
}
