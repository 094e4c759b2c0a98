//! The authentication boundary the WebSocket handshake calls into. Actual
//! token validation is explicitly out of scope for this crate — callers
//! supply their own [`AuthPredicate`] implementation; [`SharedSecretAuthenticator`]
//! exists only so the crate is runnable standalone and testable.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct UserInfo {
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no token was supplied")]
    MissingToken,
    #[error("token failed validation")]
    InvalidToken,
    #[error("authentication service error: {0}")]
    ServiceError(String),
}

#[async_trait]
pub trait AuthPredicate: Send + Sync {
    async fn validate(&self, token: Option<&str>) -> Result<UserInfo, AuthError>;
}

/// A minimal predicate comparing the token against a single shared secret.
/// Good enough for local development and the integration test suite; real
/// deployments should supply their own [`AuthPredicate`] (e.g. JWT
/// validation), which is not this crate's concern.
pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl AuthPredicate for SharedSecretAuthenticator {
    async fn validate(&self, token: Option<&str>) -> Result<UserInfo, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        if token == self.secret {
            Ok(UserInfo {
                user_id: "shared-secret-user".to_string(),
            })
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}
