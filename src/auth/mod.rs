//! Token verification against the external identity service.
//!
//! Verification happens exactly once per connection, on `session_start`.
//! Until it succeeds the session has no identity and audio is rejected.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::errors::SessionError;

/// Identity established by a successful verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedUser {
    pub user_id: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, SessionError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    user_id: String,
}

/// Verifies tokens via `POST { token }` to the identity service.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenVerifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, SessionError> {
        if token.trim().is_empty() {
            return Err(SessionError::AuthRequired);
        }
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| SessionError::AuthInvalid(format!("identity service unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(SessionError::AuthInvalid(format!(
                "identity service rejected token ({})",
                response.status()
            )));
        }
        let verified: VerifyResponse = response
            .json()
            .await
            .map_err(|e| SessionError::AuthInvalid(format!("bad identity response: {e}")))?;
        Ok(VerifiedUser {
            user_id: verified.user_id,
        })
    }
}

/// Accepts any non-empty token and uses it as the user id. Only for running
/// without an identity service; logs loudly when constructed.
pub struct StaticTokenVerifier;

impl StaticTokenVerifier {
    pub fn new() -> Self {
        warn!("No AUTH_SERVICE_URL configured; accepting tokens without verification");
        Self
    }
}

impl Default for StaticTokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::AuthRequired);
        }
        Ok(VerifiedUser {
            user_id: token.to_string(),
        })
    }
}
