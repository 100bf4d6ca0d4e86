use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

/// Delivers one-time codes for the email second-factor method.
#[async_trait]
pub trait CodeSender: Send + Sync {
    async fn send_code(&self, to_email: &str, code: &str) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpCodeSender {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpCodeSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Code sender initialized with SMTP relay");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl CodeSender for SmtpCodeSender {
    async fn send_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::BadRequest(e.into()))?)
            .subject("Your admin verification code")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Your verification code is {}.\n\nIt expires shortly. If you did not request it, contact your security team.",
                code
            ))
            .map_err(|e| AppError::InternalError(e.into()))?;

        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, "Verification code sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send verification code");
                Err(AppError::ServiceUnavailable)
            }
        }
    }
}

/// Keeps sent codes in memory. Used when SMTP is not configured and in tests.
#[derive(Default)]
pub struct OutboxCodeSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl OutboxCodeSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// (recipient, code) pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_code_for(&self, to_email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _)| to == to_email)
            .map(|(_, code)| code)
    }
}

#[async_trait]
impl CodeSender for OutboxCodeSender {
    async fn send_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        self.sent
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Outbox mutex poisoned: {}", e)))?
            .push((to_email.to_string(), code.to_string()));
        tracing::debug!(to = %to_email, "Verification code queued in outbox");
        Ok(())
    }
}
