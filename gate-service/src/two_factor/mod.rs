//! Second-factor challenge.
//!
//! Collects a time-windowed code or a single-use backup code, delegates the
//! comparison to the security policy and reports success or cancellation
//! upward. Authorization stays with the gate.

pub mod countdown;

use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use subtle::{Choice, ConstantTimeEq};

use crate::gate::ChallengeTicket;
use crate::models::{AdminIdentity, SecurityEvent, SecurityEventType, TwoFactorMethod};
use crate::services::email::CodeSender;
use crate::services::error::ChallengeError;
use crate::services::policy::SecurityPolicy;
use crate::services::session::{SessionManager, SessionRequest};
use crate::services::store::AdminDirectory;
use crate::services::totp::TotpVerifier;

pub use countdown::{Countdown, ExpiryHook};

const CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMode {
    Code,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Verified { session_token: String },
    Cancelled,
}

#[derive(Clone)]
pub struct ChallengeDeps {
    pub policy: Arc<dyn SecurityPolicy>,
    pub directory: Arc<dyn AdminDirectory>,
    pub sessions: Arc<SessionManager>,
    pub sender: Arc<dyn CodeSender>,
    /// Issues emailed codes; verification always goes through the policy.
    pub codes: TotpVerifier,
}

#[derive(Debug, Clone)]
pub struct ChallengeSeed {
    pub admin: AdminIdentity,
    pub origin: String,
    pub session_token: Option<String>,
    pub user_agent: Option<String>,
}

impl From<ChallengeTicket> for ChallengeSeed {
    fn from(ticket: ChallengeTicket) -> Self {
        Self {
            admin: ticket.admin,
            origin: ticket.origin,
            session_token: ticket.session_token,
            user_agent: ticket.user_agent,
        }
    }
}

/// What the challenge screen shows.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeStatus {
    pub method: TwoFactorMethod,
    pub mode: ChallengeMode,
    pub seconds_remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TwoFactorChallenge {
    deps: ChallengeDeps,
    admin: AdminIdentity,
    method: TwoFactorMethod,
    origin: String,
    user_agent: Option<String>,
    session_token: Mutex<Option<String>>,
    mode: Mutex<ChallengeMode>,
    error: Mutex<Option<String>>,
    closed: AtomicBool,
    countdown: Countdown,
}

/// Strip separators; `None` unless exactly six digits remain.
fn normalize_code(raw: &str) -> Option<String> {
    let code: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if code.len() == CODE_LENGTH && code.chars().all(|c| c.is_ascii_digit()) {
        Some(code)
    } else {
        None
    }
}

impl TwoFactorChallenge {
    /// Start a challenge: sends the first email code when applicable and starts the countdown.
    pub async fn open(deps: ChallengeDeps, seed: ChallengeSeed, window_secs: u64) -> Arc<Self> {
        let method = seed.admin.challenge_method();
        let challenge = Arc::new(Self {
            deps,
            method,
            admin: seed.admin,
            origin: seed.origin,
            user_agent: seed.user_agent,
            session_token: Mutex::new(seed.session_token),
            mode: Mutex::new(ChallengeMode::Code),
            error: Mutex::new(None),
            closed: AtomicBool::new(false),
            countdown: Countdown::new(window_secs),
        });

        if method == TwoFactorMethod::Email {
            challenge.issue_email_code().await;
        }

        let weak: Weak<Self> = Arc::downgrade(&challenge);
        let on_expired: ExpiryHook = Arc::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(challenge) = weak.upgrade() {
                    challenge.on_window_expired().await;
                }
            }
            .boxed()
        });
        challenge.countdown.start(on_expired);

        tracing::info!(admin_id = %challenge.admin.id, method = %method.as_str(), "Two-factor challenge opened");
        challenge
    }

    pub fn admin_id(&self) -> uuid::Uuid {
        self.admin.id
    }

    pub fn method(&self) -> TwoFactorMethod {
        self.method
    }

    pub fn mode(&self) -> ChallengeMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn status(&self) -> ChallengeStatus {
        ChallengeStatus {
            method: self.method,
            mode: self.mode(),
            seconds_remaining: self.countdown.remaining(),
            error: self.error.lock().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }

    pub fn set_mode(&self, mode: ChallengeMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        self.set_error(None);
        match mode {
            ChallengeMode::Code => self.countdown.restart(),
            ChallengeMode::Backup => self.countdown.stop(),
        }
    }

    /// Manual resend: new email code, or a fresh window for authenticator codes.
    pub async fn resend(&self) -> Result<(), ChallengeError> {
        self.ensure_open()?;
        if self.method == TwoFactorMethod::Email {
            self.issue_email_code().await;
        }
        self.countdown.restart();
        Ok(())
    }

    async fn on_window_expired(&self) {
        if self.is_closed() || self.mode() != ChallengeMode::Code {
            return;
        }
        if self.method == TwoFactorMethod::Email {
            tracing::debug!(admin_id = %self.admin.id, "Code window expired; resending");
            self.issue_email_code().await;
        }
    }

    async fn issue_email_code(&self) {
        let Some(secret) = self.secret() else {
            self.set_error(Some(ChallengeError::NotConfigured.to_string()));
            return;
        };
        let code = match self.deps.codes.current_code(secret) {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(admin_id = %self.admin.id, error = %e, "Failed to issue email code");
                self.set_error(Some("Could not issue a verification code".to_string()));
                return;
            }
        };
        if let Err(e) = self.deps.sender.send_code(&self.admin.email, &code).await {
            tracing::error!(admin_id = %self.admin.id, error = %e, "Failed to send email code");
            self.set_error(Some("Could not send the verification code".to_string()));
        }
    }

    fn secret(&self) -> Option<&str> {
        self.admin
            .two_factor_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    fn ensure_open(&self) -> Result<(), ChallengeError> {
        if self.is_closed() {
            return Err(ChallengeError::Closed);
        }
        Ok(())
    }

    fn set_error(&self, error: Option<String>) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    #[tracing::instrument(skip_all, fields(admin_id = %self.admin.id))]
    pub async fn verify_code(&self, code: &str) -> Result<ChallengeOutcome, ChallengeError> {
        self.ensure_open()?;
        let Some(secret) = self.secret() else {
            tracing::warn!("Second factor requested but no secret is configured");
            self.set_error(Some(ChallengeError::NotConfigured.to_string()));
            return Err(ChallengeError::NotConfigured);
        };

        let accepted = match normalize_code(code) {
            Some(code) => self.deps.policy.verify_second_factor(secret, &code).await,
            None => false,
        };
        if !accepted {
            return Err(self.reject(ChallengeMode::Code).await);
        }

        let token = self.finalize_session().await?;
        self.deps
            .policy
            .track_login_attempt(self.admin.label(), &self.origin, true)
            .await;
        self.deps
            .policy
            .log_security_event(SecurityEvent::low(
                Some(self.admin.id),
                self.admin.label(),
                SecurityEventType::TwoFactorVerified,
                json!({ "method": self.method, "origin": self.origin }),
            ))
            .await;
        metrics::counter!("gate_challenge_verifications_total", "kind" => "code", "result" => "accepted")
            .increment(1);

        self.close();
        Ok(ChallengeOutcome::Verified {
            session_token: token,
        })
    }

    #[tracing::instrument(skip_all, fields(admin_id = %self.admin.id))]
    pub async fn verify_backup_code(&self, code: &str) -> Result<ChallengeOutcome, ChallengeError> {
        self.ensure_open()?;
        let Some(code) = normalize_code(code) else {
            return Err(self.reject(ChallengeMode::Backup).await);
        };

        // Fresh read: codes consumed elsewhere must not be accepted here.
        let admin = self
            .deps
            .directory
            .find_admin(self.admin.id)
            .await
            .map_err(|e| ChallengeError::Unavailable(e.to_string()))?
            .ok_or_else(|| ChallengeError::Unavailable("admin record missing".to_string()))?;

        let matched = admin
            .backup_codes
            .iter()
            .fold(Choice::from(0u8), |acc, candidate| {
                acc | candidate.as_bytes().ct_eq(code.as_bytes())
            });
        if !bool::from(matched) {
            return Err(self.reject(ChallengeMode::Backup).await);
        }

        let removed = self
            .deps
            .directory
            .remove_backup_code(admin.id, &code)
            .await
            .map_err(|e| ChallengeError::Unavailable(e.to_string()))?;
        if !removed {
            return Err(self.reject(ChallengeMode::Backup).await);
        }

        let token = self.finalize_session().await?;
        self.deps
            .policy
            .track_login_attempt(self.admin.label(), &self.origin, true)
            .await;
        self.deps
            .policy
            .log_security_event(SecurityEvent::medium(
                Some(self.admin.id),
                self.admin.label(),
                SecurityEventType::BackupCodeUsed,
                json!({
                    "origin": self.origin,
                    "remaining": admin.backup_codes.len().saturating_sub(1),
                }),
            ))
            .await;
        metrics::counter!("gate_challenge_verifications_total", "kind" => "backup", "result" => "accepted")
            .increment(1);

        self.close();
        Ok(ChallengeOutcome::Verified {
            session_token: token,
        })
    }

    /// Generic failure path shared by both modes.
    async fn reject(&self, mode: ChallengeMode) -> ChallengeError {
        let kind = match mode {
            ChallengeMode::Code => "code",
            ChallengeMode::Backup => "backup",
        };
        self.deps
            .policy
            .track_login_attempt(self.admin.label(), &self.origin, false)
            .await;
        self.deps
            .policy
            .log_security_event(SecurityEvent::medium(
                Some(self.admin.id),
                self.admin.label(),
                SecurityEventType::TwoFactorFailed,
                json!({ "kind": kind, "origin": self.origin }),
            ))
            .await;
        metrics::counter!("gate_challenge_verifications_total", "kind" => kind, "result" => "rejected")
            .increment(1);

        let error = ChallengeError::Incorrect;
        self.set_error(Some(error.to_string()));
        error
    }

    /// Mark the current session verified, or create one already verified.
    async fn finalize_session(&self) -> Result<String, ChallengeError> {
        let existing = self
            .session_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(token) = existing {
            match self.deps.sessions.mark_two_factor_verified(&token).await {
                Ok(true) => return Ok(token),
                Ok(false) => {
                    tracing::info!("Session gone before verification; creating a verified session");
                }
                Err(e) => return Err(ChallengeError::Session(e.to_string())),
            }
        }

        let token = self
            .deps
            .sessions
            .create_session(SessionRequest {
                admin_id: self.admin.id,
                label: self.admin.label().to_string(),
                origin_ip: self.origin.clone(),
                user_agent: self.user_agent.clone(),
                two_factor_verified: true,
                two_factor_enforced: true,
            })
            .await
            .map_err(|e| ChallengeError::Session(e.to_string()))?;
        *self
            .session_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(token)
    }

    /// Abandon the challenge and fully log out.
    pub async fn cancel(&self) -> ChallengeOutcome {
        self.close();
        self.deps.sessions.logout().await;
        self.deps
            .policy
            .log_security_event(SecurityEvent::low(
                Some(self.admin.id),
                self.admin.label(),
                SecurityEventType::TwoFactorCancelled,
                json!({ "origin": self.origin }),
            ))
            .await;
        tracing::info!(admin_id = %self.admin.id, "Two-factor challenge cancelled");
        ChallengeOutcome::Cancelled
    }

    /// Stop timers. Further submissions fail with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.countdown.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" 123 456 ").as_deref(), Some("123456"));
        assert_eq!(normalize_code("123-456").as_deref(), Some("123456"));
        assert!(normalize_code("12345").is_none());
        assert!(normalize_code("12a456").is_none());
        assert!(normalize_code("1234567").is_none());
    }
}
