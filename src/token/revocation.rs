//! Token Revocation
//!
//! RFC 7009 - OAuth 2.0 Token Revocation.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::core::{lock, HttpRequest, HttpTransport};
use crate::error::{parse_error_response, CredentialError};
use crate::types::{CredentialRecord, TokenTypeHint, GOOGLE_REVOKE_URI};

/// Token revoker interface.
#[async_trait]
pub trait TokenRevoker: Send + Sync {
    /// Revoke a token at the provider.
    async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<(), CredentialError>;

    /// Revoke the grant behind a record.
    ///
    /// Revoking the refresh token ends the whole grant, so it is preferred
    /// over the access token when present.
    async fn revoke_record(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        match &record.refresh_token {
            Some(refresh) => {
                self.revoke(refresh.expose_secret(), TokenTypeHint::RefreshToken)
                    .await
            }
            None => {
                self.revoke(record.access_token(), TokenTypeHint::AccessToken)
                    .await
            }
        }
    }
}

/// Revoker posting to a revocation endpoint.
pub struct DefaultTokenRevoker {
    endpoint: String,
    transport: Arc<dyn HttpTransport>,
}

impl DefaultTokenRevoker {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
        }
    }

    /// Revoker for Google's endpoint.
    pub fn google(transport: Arc<dyn HttpTransport>) -> Self {
        Self::new(GOOGLE_REVOKE_URI, transport)
    }
}

#[async_trait]
impl TokenRevoker for DefaultTokenRevoker {
    async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<(), CredentialError> {
        let request = HttpRequest::form_post(
            &self.endpoint,
            &[("token", token), ("token_type_hint", hint.as_str())],
        );

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| CredentialError::RevocationFailed {
                message: e.to_string(),
            })?;

        if response.is_success() {
            return Ok(());
        }

        // Google answers 400 invalid_token for tokens that are already dead.
        let error = parse_error_response(&response.body);
        if response.status == 400 && error.as_ref().map(|e| e.error.as_str()) == Some("invalid_token") {
            debug!("Token was already revoked or expired at the provider");
            return Ok(());
        }

        let message = match error {
            Some(error) => match error.error_description {
                Some(description) => format!("{}: {}", error.error, description),
                None => error.error,
            },
            None => format!("HTTP {}", response.status),
        };
        Err(CredentialError::RevocationFailed { message })
    }
}

/// Mock token revoker for testing.
#[derive(Default)]
pub struct MockTokenRevoker {
    history: Mutex<Vec<(String, TokenTypeHint)>>,
    should_fail: Mutex<bool>,
}

impl MockTokenRevoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every revocation with a network-style error.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *lock(&self.should_fail) = should_fail;
        self
    }

    /// `(token, hint)` of every revocation attempt, oldest first.
    pub fn get_history(&self) -> Vec<(String, TokenTypeHint)> {
        lock(&self.history).clone()
    }
}

#[async_trait]
impl TokenRevoker for MockTokenRevoker {
    async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<(), CredentialError> {
        lock(&self.history).push((token.to_string(), hint));

        if *lock(&self.should_fail) {
            return Err(CredentialError::RevocationFailed {
                message: "Mock revocation failure".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockHttpTransport;
    use crate::types::{ScopeSet, TokenResponse};
    use chrono::Utc;
    use std::collections::HashMap;

    fn record(refresh: Option<&str>) -> CredentialRecord {
        let response = TokenResponse {
            access_token: "access-1".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: refresh.map(String::from),
            scope: None,
            id_token: None,
            extra: HashMap::new(),
        };
        CredentialRecord::from_token_response(
            &response,
            "cid",
            &ScopeSet::new(["videos.upload"]).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_revoke_prefers_refresh_token() {
        let revoker = MockTokenRevoker::new();
        revoker.revoke_record(&record(Some("refresh-1"))).await.unwrap();
        revoker.revoke_record(&record(None)).await.unwrap();

        assert_eq!(
            revoker.get_history(),
            vec![
                ("refresh-1".to_string(), TokenTypeHint::RefreshToken),
                ("access-1".to_string(), TokenTypeHint::AccessToken),
            ]
        );
    }

    #[tokio::test]
    async fn test_default_revoker_request_and_outcomes() {
        let transport = Arc::new(MockHttpTransport::new());
        transport
            .queue_response(200, "")
            .queue_json_response(400, &serde_json::json!({"error": "invalid_token"}))
            .queue_response(503, "unavailable");
        let revoker = DefaultTokenRevoker::google(transport.clone());

        revoker.revoke("tok", TokenTypeHint::RefreshToken).await.unwrap();
        let request = transport.get_last_request().unwrap();
        assert_eq!(request.url, GOOGLE_REVOKE_URI);
        assert_eq!(request.form_params()["token"], "tok");
        assert_eq!(request.form_params()["token_type_hint"], "refresh_token");

        revoker.revoke("tok", TokenTypeHint::RefreshToken).await.unwrap();

        let err = revoker.revoke("tok", TokenTypeHint::RefreshToken).await.unwrap_err();
        assert!(matches!(err, CredentialError::RevocationFailed { .. }));
        assert_eq!(err.error_code(), "CRED_REVOKE");
        assert!(!err.needs_reauth());
    }

    #[tokio::test]
    async fn test_transport_failure_is_revocation_failure() {
        let revoker = DefaultTokenRevoker::google(Arc::new(MockHttpTransport::new()));
        let err = revoker.revoke("tok", TokenTypeHint::AccessToken).await.unwrap_err();
        assert!(matches!(err, CredentialError::RevocationFailed { .. }));
    }
}
