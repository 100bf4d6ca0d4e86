//! Security policy consumed by the gate.
//!
//! Answers lock and origin questions, records attempts and events, and
//! verifies second-factor codes. The gate never compares codes itself.

use crate::models::{LoginAttempt, SecurityEvent};
use crate::services::error::PolicyError;
use crate::services::origin::UNKNOWN_ORIGIN;
use crate::services::store::SecurityLedger;
use crate::services::totp::TotpVerifier;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OriginDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait SecurityPolicy: Send + Sync {
    async fn is_account_locked(&self, label: &str) -> Result<bool, PolicyError>;

    async fn is_origin_allowed(&self, origin: &str) -> Result<OriginDecision, PolicyError>;

    /// Best effort; failures are logged, never surfaced.
    async fn track_login_attempt(&self, label: &str, origin: &str, success: bool);

    /// Best effort; failures are logged, never surfaced.
    async fn log_security_event(&self, event: SecurityEvent);

    async fn verify_second_factor(&self, secret: &str, code: &str) -> bool;
}

/// Set of permitted caller networks. Empty means every origin is allowed.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowList(Vec<IpNetwork>);

impl OriginAllowList {
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self(networks)
    }

    /// Parse a comma-separated list of CIDRs or bare addresses.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let networks = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNetwork>()
                    .map_err(|e| format!("Invalid allowed origin '{}': {}", s, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(networks))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn decide(&self, origin: &str) -> OriginDecision {
        if self.0.is_empty() {
            return OriginDecision::allow();
        }
        if origin == UNKNOWN_ORIGIN {
            return OriginDecision::deny("Caller origin could not be determined");
        }
        let ip: IpAddr = match origin.parse() {
            Ok(ip) => ip,
            Err(_) => return OriginDecision::deny(format!("Unrecognized origin {}", origin)),
        };
        if self.0.iter().any(|net| net.contains(ip)) {
            OriginDecision::allow()
        } else {
            OriginDecision::deny(format!("Origin {} is not on the allow-list", origin))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: i64,
    pub window: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            window: Duration::minutes(15),
        }
    }
}

/// Ledger-backed policy: lockout from recent failed attempts, CIDR allow-list, TOTP codes.
pub struct DefaultSecurityPolicy {
    ledger: Arc<dyn SecurityLedger>,
    allow_list: OriginAllowList,
    verifier: TotpVerifier,
    lockout: LockoutPolicy,
}

impl DefaultSecurityPolicy {
    pub fn new(
        ledger: Arc<dyn SecurityLedger>,
        allow_list: OriginAllowList,
        verifier: TotpVerifier,
        lockout: LockoutPolicy,
    ) -> Self {
        Self {
            ledger,
            allow_list,
            verifier,
            lockout,
        }
    }
}

#[async_trait]
impl SecurityPolicy for DefaultSecurityPolicy {
    async fn is_account_locked(&self, label: &str) -> Result<bool, PolicyError> {
        let window_start = Utc::now() - self.lockout.window;
        // A success resets the failure count.
        let since = match self
            .ledger
            .last_successful_attempt(label)
            .await
            .map_err(|e| PolicyError::Unreachable(e.to_string()))?
        {
            Some(last_success) if last_success > window_start => last_success,
            _ => window_start,
        };

        let failures = self
            .ledger
            .count_failed_attempts_since(label, since)
            .await
            .map_err(|e| PolicyError::Unreachable(e.to_string()))?;

        Ok(failures >= self.lockout.max_failed_attempts)
    }

    async fn is_origin_allowed(&self, origin: &str) -> Result<OriginDecision, PolicyError> {
        Ok(self.allow_list.decide(origin))
    }

    async fn track_login_attempt(&self, label: &str, origin: &str, success: bool) {
        let attempt = LoginAttempt::new(label, origin, success);
        if let Err(e) = self.ledger.record_login_attempt(&attempt).await {
            tracing::warn!(
                label = %label,
                success = success,
                error = %e,
                "Failed to record login attempt"
            );
        }
    }

    async fn log_security_event(&self, event: SecurityEvent) {
        tracing::info!(
            event_type = %event.event_type,
            severity = %event.severity,
            actor = %event.actor_label,
            "Security event"
        );
        if let Err(e) = self.ledger.append_event(&event).await {
            tracing::error!(
                event_type = %event.event_type,
                error = %e,
                "Failed to persist security event"
            );
        }
    }

    async fn verify_second_factor(&self, secret: &str, code: &str) -> bool {
        self.verifier.verify(secret, code)
    }
}
