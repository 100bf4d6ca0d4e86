use crate::models::{Capability, Role};
use service_core::error::AppError;
use thiserror::Error;

/// No usable identity for the caller.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Not authenticated")]
    NoIdentity,

    #[error("Identity provider error: {0}")]
    Provider(String),
}

/// Lock or origin checks could not be answered. Treated as soft by the gate.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Security policy unreachable: {0}")]
    Unreachable(String),
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("No admin record for {0}")]
    NotFound(String),

    #[error("Admin account {0} is inactive")]
    Inactive(String),

    #[error("Admin directory lookup failed: {0}")]
    Lookup(String),
}

#[derive(Error, Debug)]
pub enum AuthorizationError {
    #[error("Insufficient role: requires {required}, current role is {actual}")]
    InsufficientRole { required: Role, actual: Role },

    #[error("Missing permissions: {}", format_capabilities(.0))]
    MissingCapabilities(Vec<Capability>),
}

fn format_capabilities(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(Capability::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures from the durable stores behind the gate.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),

    /// The store refuses to finalize a session until the second factor is verified.
    #[error("Two-factor verification required before session finalization")]
    TwoFactorRequired,

    #[error("Record not found")]
    NotFound,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Unavailable(anyhow::Error::new(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    /// Control-flow signal, not a failure: the session is finalized after the challenge.
    #[error("Two-factor verification required before session finalization")]
    TwoFactorRequired,

    #[error("Session creation failed: {0}")]
    Creation(String),

    #[error("No active session")]
    NoSession,

    #[error("Session store error: {0}")]
    Store(String),
}

/// The durable session lookup was unreachable; the local mirror was trusted instead.
#[derive(Error, Debug)]
#[error("Session store degraded: {0}")]
pub struct StorageDegraded(pub String);

#[derive(Error, Debug)]
pub enum ChallengeError {
    /// Deliberately generic for both wrong and expired codes.
    #[error("The code is incorrect or has expired")]
    Incorrect,

    #[error("Two-factor authentication is not configured for this account")]
    NotConfigured,

    #[error("Challenge is closed")]
    Closed,

    #[error("Could not finalize session: {0}")]
    Session(String),

    #[error("Challenge unavailable: {0}")]
    Unavailable(String),
}

/// Misuse of a gate instance's run lifecycle.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("An evaluation is already in flight")]
    AlreadyRunning,

    #[error("Gate has already settled; retry or tear down first")]
    AlreadySettled,

    #[error("Gate is not awaiting a two-factor challenge")]
    NotAwaitingChallenge,

    #[error("Retry is only available after a failed evaluation")]
    RetryNotAllowed,

    #[error("Gate was torn down during evaluation")]
    TornDown,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NoIdentity => AppError::Unauthorized(anyhow::anyhow!("Not authenticated")),
            AuthError::Provider(e) => {
                tracing::warn!(error = %e, "Identity provider unavailable");
                AppError::ServiceUnavailable
            }
        }
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Lookup(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            other => AppError::Forbidden(anyhow::anyhow!(other.to_string())),
        }
    }
}

impl From<AuthorizationError> for AppError {
    fn from(err: AuthorizationError) -> Self {
        AppError::Forbidden(anyhow::anyhow!(err.to_string()))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => AppError::DatabaseError(e),
            StoreError::TwoFactorRequired => {
                AppError::Unauthorized(anyhow::anyhow!("Two-factor verification required"))
            }
            StoreError::NotFound => AppError::NotFound(anyhow::anyhow!("Record not found")),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::TwoFactorRequired => {
                AppError::Unauthorized(anyhow::anyhow!("Two-factor verification required"))
            }
            SessionError::NoSession => AppError::Unauthorized(anyhow::anyhow!("No active session")),
            SessionError::Creation(e) | SessionError::Store(e) => {
                AppError::InternalError(anyhow::anyhow!(e))
            }
        }
    }
}

impl From<ChallengeError> for AppError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::Incorrect => AppError::Unauthorized(anyhow::anyhow!(err.to_string())),
            ChallengeError::NotConfigured => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            ChallengeError::Closed => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            ChallengeError::Session(e) | ChallengeError::Unavailable(e) => {
                AppError::InternalError(anyhow::anyhow!(e))
            }
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::TornDown => AppError::ServiceUnavailable,
            other => AppError::Conflict(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_role_names_both_roles() {
        let err = AuthorizationError::InsufficientRole {
            required: Role::Admin,
            actual: Role::Moderator,
        };
        let message = err.to_string();
        assert!(message.contains("admin"));
        assert!(message.contains("moderator"));
    }

    #[test]
    fn test_missing_capabilities_lists_each() {
        let err = AuthorizationError::MissingCapabilities(vec![
            Capability::ManageSettings,
            Capability::ViewAuditLog,
        ]);
        assert_eq!(
            err.to_string(),
            "Missing permissions: manage_settings, view_audit_log"
        );
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound));
    }
}
