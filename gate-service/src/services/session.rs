//! Session lifecycle: creation, validation, renewal, revocation and monitoring.
//!
//! The durable store is authoritative. The local mirror only caches token and
//! expiry so that a missing or expired session is rejected without a store
//! round-trip, and so validation can survive a store outage for up to one TTL.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::models::session::token_prefix;
use crate::models::Session;
use crate::services::error::{SessionError, StorageDegraded, StoreError};
use crate::services::mirror::{MirrorEntry, SessionMirror};
use crate::services::store::SessionStore;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: chrono::Duration,
    pub monitor_interval: std::time::Duration,
    /// Refuse to persist an unverified session for identities that enforce 2FA.
    pub defer_until_verified: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::hours(2),
            monitor_interval: std::time::Duration::from_secs(60),
            defer_until_verified: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub admin_id: Uuid,
    pub label: String,
    pub origin_ip: String,
    pub user_agent: Option<String>,
    pub two_factor_verified: bool,
    /// The identity will be challenged for a second factor on this route.
    pub two_factor_enforced: bool,
}

#[derive(Debug)]
pub enum SessionValidity {
    Valid { admin_id: Uuid },
    /// Store unreachable; the unexpired local mirror was trusted.
    Degraded(StorageDegraded),
    Invalid(String),
}

impl SessionValidity {
    pub fn is_usable(&self) -> bool {
        !matches!(self, SessionValidity::Invalid(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Active,
    LoggedOut,
    /// The monitor found the session invalid and logged out; views must reload.
    Expired,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    mirror: Arc<dyn SessionMirror>,
    settings: SessionSettings,
    monitor: Mutex<Option<JoinHandle<()>>>,
    signal: watch::Sender<SessionSignal>,
}

/// 256-bit token from the OS CSPRNG, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        mirror: Arc<dyn SessionMirror>,
        settings: SessionSettings,
    ) -> Self {
        let (signal, _) = watch::channel(SessionSignal::LoggedOut);
        Self {
            store,
            mirror,
            settings,
            monitor: Mutex::new(None),
            signal,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSignal> {
        self.signal.subscribe()
    }

    #[tracing::instrument(skip_all, fields(admin_id = %request.admin_id))]
    pub async fn create_session(&self, request: SessionRequest) -> Result<String, SessionError> {
        if self.settings.defer_until_verified
            && request.two_factor_enforced
            && !request.two_factor_verified
        {
            tracing::info!("Deferring session creation until second factor is verified");
            return Err(SessionError::TwoFactorRequired);
        }

        let token = generate_token();
        let session = Session::new(
            token.clone(),
            request.admin_id,
            request.origin_ip,
            request.user_agent,
            self.settings.ttl,
            request.two_factor_verified,
        );

        match self.store.insert_session(&session).await {
            Ok(()) => {}
            Err(StoreError::TwoFactorRequired) => {
                tracing::info!("Session store requires second factor before finalization");
                return Err(SessionError::TwoFactorRequired);
            }
            Err(e) => {
                tracing::error!(error = %e, label = %request.label, "Failed to create session");
                return Err(SessionError::Creation(e.to_string()));
            }
        }

        let entry = MirrorEntry {
            token: token.clone(),
            owner: Some(session.admin_id),
            expires_at: session.expires_at,
        };
        if let Err(e) = self.mirror.store(&entry) {
            tracing::warn!(error = %e, "Failed to mirror session locally");
        }
        if request.two_factor_verified {
            self.record_verified_at(Utc::now());
        }

        self.signal.send_replace(SessionSignal::Active);
        tracing::info!(token_prefix = %session.token_prefix(), "Session created");
        Ok(token)
    }

    /// Local-first validation with sliding renewal.
    pub async fn validate(&self) -> SessionValidity {
        let validity = self.validate_inner().await;
        let result = match &validity {
            SessionValidity::Valid { .. } => "valid",
            SessionValidity::Degraded(_) => "degraded",
            SessionValidity::Invalid(_) => "invalid",
        };
        metrics::counter!("gate_session_validations_total", "result" => result).increment(1);
        validity
    }

    async fn validate_inner(&self) -> SessionValidity {
        let entry = match self.mirror.load() {
            Ok(Some(entry)) => entry,
            Ok(None) => return SessionValidity::Invalid("No local session".to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "Local session mirror unreadable");
                return SessionValidity::Invalid("Local session unreadable".to_string());
            }
        };

        let now = Utc::now();
        if entry.is_expired(now) {
            self.clear_mirror();
            return SessionValidity::Invalid("Session expired".to_string());
        }

        let session = match self.store.find_active_session(&entry.token).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::info!(token_prefix = %token_prefix(&entry.token), "Session revoked or missing");
                self.clear_mirror();
                return SessionValidity::Invalid("Session revoked".to_string());
            }
            Err(e) => {
                tracing::warn!(
                    token_prefix = %token_prefix(&entry.token),
                    error = %e,
                    expires_at = %entry.expires_at,
                    "Session store unreachable; trusting local mirror"
                );
                return SessionValidity::Degraded(StorageDegraded(e.to_string()));
            }
        };

        if session.is_expired() {
            self.clear_mirror();
            return SessionValidity::Invalid("Session expired".to_string());
        }

        let expires_at = now + self.settings.ttl;
        match self.store.touch_session(&entry.token, expires_at, now).await {
            Ok(()) => {
                let renewed = MirrorEntry {
                    token: entry.token.clone(),
                    owner: Some(session.admin_id),
                    expires_at,
                };
                if let Err(e) = self.mirror.store(&renewed) {
                    tracing::warn!(error = %e, "Failed to refresh local session mirror");
                }
            }
            Err(e) => {
                tracing::warn!(
                    token_prefix = %token_prefix(&entry.token),
                    error = %e,
                    "Failed to extend session"
                );
            }
        }

        SessionValidity::Valid {
            admin_id: session.admin_id,
        }
    }

    pub async fn is_session_valid(&self) -> bool {
        self.validate().await.is_usable()
    }

    /// Unexpired token from the local mirror.
    pub fn current_token(&self) -> Option<String> {
        match self.mirror.load() {
            Ok(Some(entry)) if !entry.is_expired(Utc::now()) => Some(entry.token),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Local session mirror unreadable");
                None
            }
        }
    }

    /// Mirrored token, only when it was issued to `admin_id`.
    pub fn current_token_for(&self, admin_id: Uuid) -> Option<String> {
        match self.mirror.load() {
            Ok(Some(entry)) if !entry.is_expired(Utc::now()) && entry.owner == Some(admin_id) => {
                Some(entry.token)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Local session mirror unreadable");
                None
            }
        }
    }

    /// Durable read of the verification flag for the current session. Fails closed.
    pub async fn is_two_factor_verified(&self) -> bool {
        match self.current_token() {
            Some(token) => self.is_two_factor_verified_for(&token).await,
            None => false,
        }
    }

    pub async fn is_two_factor_verified_for(&self, token: &str) -> bool {
        match self.store.find_active_session(token).await {
            Ok(Some(session)) => session.is_active() && session.two_factor_verified,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    token_prefix = %token_prefix(token),
                    error = %e,
                    "Could not read two-factor flag; treating as unverified"
                );
                false
            }
        }
    }

    /// Durable write of the verification flag. `Ok(false)` when the row is gone.
    pub async fn mark_two_factor_verified(&self, token: &str) -> Result<bool, SessionError> {
        let marked = self
            .store
            .mark_two_factor_verified(token)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        if marked {
            self.record_verified_at(Utc::now());
            tracing::info!(token_prefix = %token_prefix(token), "Session marked two-factor verified");
        }
        Ok(marked)
    }

    /// Progress-display hint only.
    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.mirror.verified_at().ok().flatten()
    }

    fn record_verified_at(&self, at: DateTime<Utc>) {
        if let Err(e) = self.mirror.record_verified_at(at) {
            tracing::warn!(error = %e, "Failed to record verification time locally");
        }
    }

    fn clear_mirror(&self) {
        if let Err(e) = self.mirror.clear() {
            tracing::warn!(error = %e, "Failed to clear local session mirror");
        }
    }

    pub async fn logout(&self) {
        self.stop_session_monitoring();
        self.logout_inner().await;
        self.signal.send_replace(SessionSignal::LoggedOut);
    }

    async fn logout_inner(&self) {
        let token = match self.mirror.load() {
            Ok(entry) => entry.map(|e| e.token),
            Err(e) => {
                tracing::warn!(error = %e, "Local session mirror unreadable during logout");
                None
            }
        };

        if let Some(token) = token {
            match self.store.revoke_session(&token).await {
                Ok(()) => tracing::info!(token_prefix = %token_prefix(&token), "Session revoked"),
                Err(e) => tracing::warn!(
                    token_prefix = %token_prefix(&token),
                    error = %e,
                    "Failed to revoke session"
                ),
            }
        }
        self.clear_mirror();
    }

    /// Start the periodic validity check. Calling again while running is a no-op.
    pub fn start_session_monitoring(self: &Arc<Self>) {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.settings.monitor_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if manager.is_session_valid().await {
                    continue;
                }

                tracing::info!("Session monitor found session invalid; logging out");
                // Detach rather than abort: this task is the one running.
                manager
                    .monitor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                manager.logout_inner().await;
                manager.signal.send_replace(SessionSignal::Expired);
                break;
            }
        }));
        tracing::debug!(interval_secs = period.as_secs(), "Session monitoring started");
    }

    pub fn stop_session_monitoring(&self) {
        if let Some(handle) = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            tracing::debug!("Session monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
