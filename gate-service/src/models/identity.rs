//! Admin identity model - directory records for privileged operators.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Administrative role, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Position in the role hierarchy; higher ranks include lower ones.
    pub fn rank(self) -> u8 {
        match self {
            Role::Moderator => 1,
            Role::Admin => 2,
            Role::SuperAdmin => 3,
        }
    }

    /// Whether this role meets a route's minimum role.
    pub fn satisfies(self, minimum: Role) -> bool {
        self.rank() >= minimum.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Capability flags gating individual administrative actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageUsers,
    ManageListings,
    ManageReports,
    ManageSettings,
    ManageAdmins,
    ViewAnalytics,
    ViewAuditLog,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::ManageUsers,
        Capability::ManageListings,
        Capability::ManageReports,
        Capability::ManageSettings,
        Capability::ManageAdmins,
        Capability::ViewAnalytics,
        Capability::ViewAuditLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ManageUsers => "manage_users",
            Capability::ManageListings => "manage_listings",
            Capability::ManageReports => "manage_reports",
            Capability::ManageSettings => "manage_settings",
            Capability::ManageAdmins => "manage_admins",
            Capability::ViewAnalytics => "view_analytics",
            Capability::ViewAuditLog => "view_audit_log",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid capability: {}", s))
    }
}

/// Second-factor delivery method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Authenticator,
    Email,
}

impl TwoFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFactorMethod::Authenticator => "authenticator",
            TwoFactorMethod::Email => "email",
        }
    }
}

impl FromStr for TwoFactorMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authenticator" => Ok(TwoFactorMethod::Authenticator),
            "email" => Ok(TwoFactorMethod::Email),
            _ => Err(format!("Invalid two-factor method: {}", s)),
        }
    }
}

/// The authenticated principal, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

impl Identity {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

/// Directory record for an administrator.
#[derive(Clone)]
pub struct AdminIdentity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub capabilities: BTreeSet<Capability>,
    pub is_active: bool,
    pub two_factor_enabled: bool,
    pub two_factor_method: Option<TwoFactorMethod>,
    /// Base32 shared secret.
    pub two_factor_secret: Option<String>,
    pub backup_codes: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl AdminIdentity {
    /// Create an active admin without capabilities or a second factor.
    pub fn new(id: Uuid, email: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            email: email.into(),
            role,
            capabilities: BTreeSet::new(),
            is_active: true,
            two_factor_enabled: false,
            two_factor_method: None,
            two_factor_secret: None,
            backup_codes: Vec::new(),
            last_login_at: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_two_factor(
        mut self,
        method: TwoFactorMethod,
        secret: impl Into<String>,
        backup_codes: Vec<String>,
    ) -> Self {
        self.two_factor_enabled = true;
        self.two_factor_method = Some(method);
        self.two_factor_secret = Some(secret.into());
        self.backup_codes = backup_codes;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Label used for lockout tracking and event attribution.
    pub fn label(&self) -> &str {
        &self.email
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Required capabilities this identity does not hold, in request order.
    pub fn missing_capabilities(&self, required: &[Capability]) -> Vec<Capability> {
        let mut missing: Vec<Capability> = required
            .iter()
            .filter(|c| !self.capabilities.contains(c))
            .copied()
            .collect();
        missing.dedup();
        missing
    }

    /// Method used for the challenge; authenticator when unset.
    pub fn challenge_method(&self) -> TwoFactorMethod {
        self.two_factor_method
            .unwrap_or(TwoFactorMethod::Authenticator)
    }

    /// Whether the last-login stamp is older than `interval` (or missing).
    pub fn login_stamp_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_login_at {
            Some(last) => now - last > interval,
            None => true,
        }
    }
}

impl fmt::Debug for AdminIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminIdentity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("capabilities", &self.capabilities)
            .field("is_active", &self.is_active)
            .field("two_factor_enabled", &self.two_factor_enabled)
            .field("two_factor_method", &self.two_factor_method)
            .field("two_factor_secret", &self.two_factor_secret.as_ref().map(|_| "[redacted]"))
            .field("backup_codes_remaining", &self.backup_codes.len())
            .field("last_login_at", &self.last_login_at)
            .finish()
    }
}
