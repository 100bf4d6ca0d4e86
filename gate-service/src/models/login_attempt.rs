use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One authentication attempt against an admin label. Lockout is derived from these.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LoginAttempt {
    pub identity_label: String,
    pub origin_ip: String,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn new(identity_label: impl Into<String>, origin_ip: impl Into<String>, success: bool) -> Self {
        Self {
            identity_label: identity_label.into(),
            origin_ip: origin_ip.into(),
            success,
            attempted_at: Utc::now(),
        }
    }
}
