//! In-memory stores for development and tests.

use crate::models::{AdminIdentity, LoginAttempt, SecurityEvent, SecurityEventType, Session};
use crate::services::error::StoreError;
use crate::services::store::{AdminDirectory, SecurityLedger, SessionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Backs every gate store with process memory. Failure switches simulate an
/// unreachable or stricter durable store.
#[derive(Default)]
pub struct MemoryStore {
    admins: Mutex<HashMap<Uuid, AdminIdentity>>,
    sessions: Mutex<HashMap<String, Session>>,
    attempts: Mutex<Vec<LoginAttempt>>,
    events: Mutex<Vec<SecurityEvent>>,
    sessions_unavailable: AtomicBool,
    session_writes_failing: AtomicBool,
    refuse_unverified_sessions: AtomicBool,
    directory_unavailable: AtomicBool,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex
        .lock()
        .map_err(|e| StoreError::Unavailable(anyhow::anyhow!("Memory {} mutex poisoned: {}", name, e)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin(self, admin: AdminIdentity) -> Self {
        self.put_admin(admin);
        self
    }

    pub fn put_admin(&self, admin: AdminIdentity) {
        if let Ok(mut admins) = self.admins.lock() {
            admins.insert(admin.id, admin);
        }
    }

    /// Durable session lookups fail while set.
    pub fn set_sessions_unavailable(&self, unavailable: bool) {
        self.sessions_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Session inserts and activity updates fail while set.
    pub fn set_session_writes_failing(&self, failing: bool) {
        self.session_writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Inserting an unverified session yields the two-factor sentinel while set.
    pub fn set_refuse_unverified_sessions(&self, refuse: bool) {
        self.refuse_unverified_sessions.store(refuse, Ordering::SeqCst);
    }

    pub fn set_directory_unavailable(&self, unavailable: bool) {
        self.directory_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn admin(&self, id: Uuid) -> Option<AdminIdentity> {
        self.admins.lock().ok()?.get(&id).cloned()
    }

    pub fn session(&self, token: &str) -> Option<Session> {
        self.sessions.lock().ok()?.get(token).cloned()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn attempts(&self) -> Vec<LoginAttempt> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_of(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Force a stored session's expiry, e.g. to simulate server-side expiry.
    pub fn expire_session(&self, token: &str, at: DateTime<Utc>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(session) = sessions.get_mut(token) {
                session.expires_at = at;
            }
        }
    }

    fn ensure_sessions_reachable(&self) -> Result<(), StoreError> {
        if self.sessions_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!("session store unreachable")));
        }
        Ok(())
    }

    fn ensure_session_writes(&self) -> Result<(), StoreError> {
        if self.session_writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!("session store rejected write")));
        }
        Ok(())
    }
}

#[async_trait]
impl AdminDirectory for MemoryStore {
    async fn find_admin(&self, id: Uuid) -> Result<Option<AdminIdentity>, StoreError> {
        if self.directory_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!("directory unreachable")));
        }
        Ok(lock(&self.admins, "admins")?.get(&id).cloned())
    }

    async fn stamp_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut admins = lock(&self.admins, "admins")?;
        let admin = admins.get_mut(&id).ok_or(StoreError::NotFound)?;
        admin.last_login_at = Some(at);
        Ok(())
    }

    async fn remove_backup_code(&self, id: Uuid, code: &str) -> Result<bool, StoreError> {
        let mut admins = lock(&self.admins, "admins")?;
        let admin = admins.get_mut(&id).ok_or(StoreError::NotFound)?;
        let before = admin.backup_codes.len();
        admin.backup_codes.retain(|c| c != code);
        Ok(admin.backup_codes.len() < before)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.ensure_sessions_reachable()?;
        self.ensure_session_writes()?;
        if self.refuse_unverified_sessions.load(Ordering::SeqCst) && !session.two_factor_verified {
            return Err(StoreError::TwoFactorRequired);
        }
        lock(&self.sessions, "sessions")?.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_active_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        self.ensure_sessions_reachable()?;
        Ok(lock(&self.sessions, "sessions")?
            .get(token)
            .filter(|s| !s.revoked)
            .cloned())
    }

    async fn touch_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_sessions_reachable()?;
        self.ensure_session_writes()?;
        let mut sessions = lock(&self.sessions, "sessions")?;
        let session = sessions.get_mut(token).ok_or(StoreError::NotFound)?;
        session.expires_at = expires_at;
        session.last_activity = last_activity;
        Ok(())
    }

    async fn mark_two_factor_verified(&self, token: &str) -> Result<bool, StoreError> {
        self.ensure_sessions_reachable()?;
        let mut sessions = lock(&self.sessions, "sessions")?;
        match sessions.get_mut(token) {
            Some(session) if session.is_active() => {
                session.two_factor_verified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(&self, token: &str) -> Result<(), StoreError> {
        self.ensure_sessions_reachable()?;
        if let Some(session) = lock(&self.sessions, "sessions")?.get_mut(token) {
            session.revoked = true;
        }
        Ok(())
    }
}

#[async_trait]
impl SecurityLedger for MemoryStore {
    async fn record_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        lock(&self.attempts, "attempts")?.push(attempt.clone());
        Ok(())
    }

    async fn count_failed_attempts_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count = lock(&self.attempts, "attempts")?
            .iter()
            .filter(|a| a.identity_label == label && !a.success && a.attempted_at > since)
            .count();
        Ok(count as i64)
    }

    async fn last_successful_attempt(&self, label: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(lock(&self.attempts, "attempts")?
            .iter()
            .filter(|a| a.identity_label == label && a.success)
            .map(|a| a.attempted_at)
            .max())
    }

    async fn append_event(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        lock(&self.events, "events")?.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Duration;

    fn session(token: &str) -> Session {
        Session::new(
            token.to_string(),
            Uuid::new_v4(),
            "10.0.0.1".to_string(),
            None,
            Duration::hours(2),
            false,
        )
    }

    #[tokio::test]
    async fn test_revoked_session_not_found() {
        let store = MemoryStore::new();
        store.insert_session(&session("tok-1")).await.unwrap();
        store.revoke_session("tok-1").await.unwrap();

        assert!(store.find_active_session("tok-1").await.unwrap().is_none());
        assert!(!store.mark_two_factor_verified("tok-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_refuse_unverified_sessions_signals_two_factor() {
        let store = MemoryStore::new();
        store.set_refuse_unverified_sessions(true);

        let err = store.insert_session(&session("tok-2")).await.unwrap_err();
        assert!(matches!(err, StoreError::TwoFactorRequired));

        let mut verified = session("tok-3");
        verified.two_factor_verified = true;
        store.insert_session(&verified).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_backup_code_once() {
        let id = Uuid::new_v4();
        let mut admin = AdminIdentity::new(id, "ops@example.com", Role::Admin);
        admin.backup_codes = vec!["111111".to_string(), "222222".to_string()];
        let store = MemoryStore::new().with_admin(admin);

        assert!(store.remove_backup_code(id, "111111").await.unwrap());
        assert!(!store.remove_backup_code(id, "111111").await.unwrap());
        assert_eq!(store.admin(id).unwrap().backup_codes, vec!["222222".to_string()]);
    }
}
