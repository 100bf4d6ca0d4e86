use crate::models::Identity;
use crate::services::error::AuthError;
use crate::services::store::IdentityProvider;
use async_trait::async_trait;
use axum::http::HeaderMap;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Identity resolved ahead of the gate, e.g. by an upstream authenticating proxy.
#[derive(Debug, Clone)]
pub struct StaticIdentity(Option<Identity>);

impl StaticIdentity {
    pub fn new(identity: Identity) -> Self {
        Self(Some(identity))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }

    /// Read the identity forwarded in request headers. Missing or malformed headers are anonymous.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok());
        let email = headers
            .get(USER_EMAIL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        match (id, email) {
            (Some(id), Some(email)) => Self::new(Identity::new(id, email)),
            _ => Self::anonymous(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Result<Identity, AuthError> {
        self.0.clone().ok_or(AuthError::NoIdentity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_headers() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, id.to_string().parse().unwrap());
        headers.insert(USER_EMAIL_HEADER, "ops@example.com".parse().unwrap());

        let identity = StaticIdentity::from_headers(&headers)
            .current_identity()
            .await
            .unwrap();
        assert_eq!(identity.id, id);
        assert_eq!(identity.email, "ops@example.com");
    }

    #[tokio::test]
    async fn test_malformed_id_is_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, "not-a-uuid".parse().unwrap());
        headers.insert(USER_EMAIL_HEADER, "ops@example.com".parse().unwrap());

        let err = StaticIdentity::from_headers(&headers)
            .current_identity()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoIdentity));
    }
}
