//! Security event model - append-only audit trail for the admin gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    AuthFailed,
    AccountLocked,
    IpBlocked,
    DirectoryLookupFailed,
    InsufficientRole,
    MissingPermissions,
    SessionCreationFailed,
    TwoFactorRequired,
    TwoFactorVerified,
    TwoFactorFailed,
    BackupCodeUsed,
    TwoFactorCancelled,
    SuspiciousRequest,
    AdminAccessGranted,
    SessionExpired,
    Logout,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::AuthFailed => "auth_failed",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::IpBlocked => "ip_blocked",
            SecurityEventType::DirectoryLookupFailed => "directory_lookup_failed",
            SecurityEventType::InsufficientRole => "insufficient_role",
            SecurityEventType::MissingPermissions => "missing_permissions",
            SecurityEventType::SessionCreationFailed => "session_creation_failed",
            SecurityEventType::TwoFactorRequired => "two_factor_required",
            SecurityEventType::TwoFactorVerified => "two_factor_verified",
            SecurityEventType::TwoFactorFailed => "two_factor_failed",
            SecurityEventType::BackupCodeUsed => "backup_code_used",
            SecurityEventType::TwoFactorCancelled => "two_factor_cancelled",
            SecurityEventType::SuspiciousRequest => "suspicious_request",
            SecurityEventType::AdminAccessGranted => "admin_access_granted",
            SecurityEventType::SessionExpired => "session_expired",
            SecurityEventType::Logout => "logout",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only security event.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_label: String,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        actor_id: Option<Uuid>,
        actor_label: impl Into<String>,
        event_type: SecurityEventType,
        severity: Severity,
        context: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            actor_label: actor_label.into(),
            event_type,
            severity,
            context,
            created_at: Utc::now(),
        }
    }

    pub fn low(actor_id: Option<Uuid>, actor_label: &str, event_type: SecurityEventType, context: Value) -> Self {
        Self::new(actor_id, actor_label, event_type, Severity::Low, context)
    }

    pub fn medium(actor_id: Option<Uuid>, actor_label: &str, event_type: SecurityEventType, context: Value) -> Self {
        Self::new(actor_id, actor_label, event_type, Severity::Medium, context)
    }

    pub fn high(actor_id: Option<Uuid>, actor_label: &str, event_type: SecurityEventType, context: Value) -> Self {
        Self::new(actor_id, actor_label, event_type, Severity::High, context)
    }

    pub fn critical(actor_id: Option<Uuid>, actor_label: &str, event_type: SecurityEventType, context: Value) -> Self {
        Self::new(actor_id, actor_label, event_type, Severity::Critical, context)
    }
}
