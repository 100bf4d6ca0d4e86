//! PostgreSQL-backed gate stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{AdminIdentity, Capability, LoginAttempt, Role, SecurityEvent, Session};
use crate::services::error::StoreError;
use crate::services::store::{AdminDirectory, SecurityLedger, SessionStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct AdminRow {
    id: Uuid,
    email: String,
    role: String,
    capabilities: Vec<String>,
    is_active: bool,
    two_factor_enabled: bool,
    two_factor_method: Option<String>,
    two_factor_secret: Option<String>,
    backup_codes: Vec<String>,
    last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<AdminRow> for AdminIdentity {
    type Error = StoreError;

    fn try_from(row: AdminRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e: String| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        let mut capabilities = BTreeSet::new();
        for raw in &row.capabilities {
            match raw.parse::<Capability>() {
                Ok(capability) => {
                    capabilities.insert(capability);
                }
                Err(_) => {
                    tracing::warn!(admin_id = %row.id, capability = %raw, "Ignoring unknown capability");
                }
            }
        }

        let two_factor_method = match row.two_factor_method.as_deref() {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|e: String| StoreError::Unavailable(anyhow::anyhow!(e)))?,
            ),
            None => None,
        };

        Ok(AdminIdentity {
            id: row.id,
            email: row.email,
            role,
            capabilities,
            is_active: row.is_active,
            two_factor_enabled: row.two_factor_enabled,
            two_factor_method,
            two_factor_secret: row.two_factor_secret,
            backup_codes: row.backup_codes,
            last_login_at: row.last_login_at,
        })
    }
}

#[async_trait]
impl AdminDirectory for PgStore {
    async fn find_admin(&self, id: Uuid) -> Result<Option<AdminIdentity>, StoreError> {
        let row = sqlx::query_as::<_, AdminRow>(
            r#"
            SELECT id, email, role, capabilities, is_active, two_factor_enabled,
                   two_factor_method, two_factor_secret, backup_codes, last_login_at
            FROM admin_identities
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AdminIdentity::try_from).transpose()
    }

    async fn stamp_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE admin_identities SET last_login_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_backup_code(&self, id: Uuid, code: &str) -> Result<bool, StoreError> {
        // Conditional update so two concurrent submissions cannot both consume the code.
        let result = sqlx::query(
            r#"
            UPDATE admin_identities
            SET backup_codes = array_remove(backup_codes, $2)
            WHERE id = $1 AND $2 = ANY(backup_codes)
            "#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO admin_sessions
                (token, admin_id, issued_ip, user_agent, expires_at, two_factor_verified, revoked, last_activity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&session.token)
        .bind(session.admin_id)
        .bind(&session.issued_ip)
        .bind(&session.user_agent)
        .bind(session.expires_at)
        .bind(session.two_factor_verified)
        .bind(session.revoked)
        .bind(session.last_activity)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_active_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT token, admin_id, issued_ip, user_agent, expires_at, two_factor_verified,
                   revoked, last_activity, created_at
            FROM admin_sessions
            WHERE token = $1 AND revoked = FALSE
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn touch_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE admin_sessions SET expires_at = $1, last_activity = $2 WHERE token = $3 AND revoked = FALSE",
        )
        .bind(expires_at)
        .bind(last_activity)
        .bind(token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_two_factor_verified(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE admin_sessions SET two_factor_verified = TRUE
            WHERE token = $1 AND revoked = FALSE AND expires_at > NOW()
            "#,
        )
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE admin_sessions SET revoked = TRUE WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SecurityLedger for PgStore {
    async fn record_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO admin_login_attempts (identity_label, origin_ip, success, attempted_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&attempt.identity_label)
        .bind(&attempt.origin_ip)
        .bind(attempt.success)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_failed_attempts_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM admin_login_attempts
            WHERE identity_label = $1 AND success = FALSE AND attempted_at > $2
            "#,
        )
        .bind(label)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn last_successful_attempt(&self, label: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(attempted_at) FROM admin_login_attempts WHERE identity_label = $1 AND success = TRUE",
        )
        .bind(label)
        .fetch_one(&self.pool)
        .await?;
        Ok(last)
    }

    async fn append_event(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO security_events (id, actor_id, actor_label, event_type, severity, context, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.actor_id)
        .bind(&event.actor_label)
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(&event.context)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(capabilities: Vec<&str>) -> AdminRow {
        AdminRow {
            id: Uuid::new_v4(),
            email: "ops@example.com".to_string(),
            role: "admin".to_string(),
            capabilities: capabilities.into_iter().map(String::from).collect(),
            is_active: true,
            two_factor_enabled: true,
            two_factor_method: Some("email".to_string()),
            two_factor_secret: Some("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".to_string()),
            backup_codes: vec![],
            last_login_at: None,
        }
    }

    #[test]
    fn test_admin_row_skips_unknown_capabilities() {
        let admin = AdminIdentity::try_from(row(vec!["manage_users", "launch_rockets"])).unwrap();
        assert_eq!(admin.capabilities.len(), 1);
        assert!(admin.has_capability(Capability::ManageUsers));
        assert_eq!(admin.two_factor_method, Some(crate::models::TwoFactorMethod::Email));
    }

    #[test]
    fn test_admin_row_rejects_unknown_role() {
        let mut bad = row(vec![]);
        bad.role = "root".to_string();
        assert!(AdminIdentity::try_from(bad).is_err());
    }
}
