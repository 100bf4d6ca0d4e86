//! Admin session model - durable access grants keyed by opaque token.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Durable session row. The store copy is authoritative for every field.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub admin_id: Uuid,
    pub issued_ip: String,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub two_factor_verified: bool,
    pub revoked: bool,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session expiring `ttl` from now.
    pub fn new(
        token: String,
        admin_id: Uuid,
        issued_ip: String,
        user_agent: Option<String>,
        ttl: Duration,
        two_factor_verified: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            token,
            admin_id,
            issued_ip,
            user_agent,
            expires_at: now + ttl,
            two_factor_verified,
            revoked: false,
            last_activity: now,
            created_at: now,
        }
    }

    /// Check if session is expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if session is usable (not expired, not revoked).
    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }

    /// Short token prefix safe for logs.
    pub fn token_prefix(&self) -> &str {
        token_prefix(&self.token)
    }
}

/// First eight characters of a token, for log correlation.
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}
