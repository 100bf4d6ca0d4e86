//! Storage seams behind the gate. Postgres in production, in-memory in tests.

use crate::models::{AdminIdentity, Identity, LoginAttempt, SecurityEvent, Session};
use crate::services::error::{AuthError, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of the currently authenticated principal.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> Result<Identity, AuthError>;
}

/// Admin directory. The gate only stamps logins and consumes backup codes.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    async fn find_admin(&self, id: Uuid) -> Result<Option<AdminIdentity>, StoreError>;

    async fn stamp_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Remove `code` from the admin's backup codes. Returns false if it was not present.
    async fn remove_backup_code(&self, id: Uuid, code: &str) -> Result<bool, StoreError>;
}

/// Durable session rows. Every write is a single-row update keyed by token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Non-revoked session for `token`, regardless of expiry.
    async fn find_active_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    async fn touch_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Set the verification flag. Returns false when no live row matched.
    async fn mark_two_factor_verified(&self, token: &str) -> Result<bool, StoreError>;

    async fn revoke_session(&self, token: &str) -> Result<(), StoreError>;
}

/// Login attempts and security events.
#[async_trait]
pub trait SecurityLedger: Send + Sync {
    async fn record_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError>;

    async fn count_failed_attempts_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    async fn last_successful_attempt(&self, label: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn append_event(&self, event: &SecurityEvent) -> Result<(), StoreError>;
}
