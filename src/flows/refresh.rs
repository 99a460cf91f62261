//! Refresh Grant
//!
//! RFC 6749 Section 6 - refreshing an access token.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::core::{lock, HttpTransport};
use crate::error::{CredentialError, TokenError};
use crate::flows::token_request::{build_token_request, send_token_request};
use crate::types::{ClientIdentity, CredentialRecord, TokenResponse};

/// Token refresh interface (for dependency injection).
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the record's refresh token and return the updated record.
    ///
    /// Every failure comes back as [`CredentialError::RefreshFailed`].
    async fn refresh(
        &self,
        client: &ClientIdentity,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord, CredentialError>;
}

/// Refresher that talks to the client's token endpoint.
pub struct DefaultTokenRefresher {
    transport: Arc<dyn HttpTransport>,
}

impl DefaultTokenRefresher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    async fn exchange(
        &self,
        client: &ClientIdentity,
        refresh_token: &str,
    ) -> Result<TokenResponse, CredentialError> {
        let request = build_token_request(
            client,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        );
        send_token_request(self.transport.as_ref(), request).await
    }
}

#[async_trait]
impl TokenRefresher for DefaultTokenRefresher {
    async fn refresh(
        &self,
        client: &ClientIdentity,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord, CredentialError> {
        let refresh_token = record
            .refresh_token
            .as_ref()
            .ok_or(TokenError::NoRefreshToken)?;

        debug!(client_id = %client.client_id, "Refreshing access token");

        let response = self
            .exchange(client, refresh_token.expose_secret())
            .await
            .map_err(into_refresh_failure)?;

        let mut updated = record.clone();
        updated
            .apply_refresh(&response, Utc::now())
            .map_err(into_refresh_failure)?;
        Ok(updated)
    }
}

fn into_refresh_failure(error: CredentialError) -> CredentialError {
    match error {
        CredentialError::RefreshFailed(_) => error,
        other => CredentialError::RefreshFailed(TokenError::Rejected {
            message: other.to_string(),
        }),
    }
}

/// Mock refresher for testing.
///
/// Without a queued outcome it extends the record by `default_lifetime`
/// and swaps in a fresh access token.
pub struct MockTokenRefresher {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    history: Mutex<Vec<CredentialRecord>>,
    default_lifetime: chrono::Duration,
}

impl Default for MockTokenRefresher {
    fn default() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            default_lifetime: chrono::Duration::hours(1),
        }
    }
}

impl MockTokenRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next refresh fail with an `invalid_grant`-style rejection.
    pub fn fail_next(&self, message: impl Into<String>) -> &Self {
        lock(&self.outcomes).push_back(Err(message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.history).len()
    }

    /// Records passed to `refresh`, oldest first.
    pub fn get_history(&self) -> Vec<CredentialRecord> {
        lock(&self.history).clone()
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn refresh(
        &self,
        _client: &ClientIdentity,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord, CredentialError> {
        lock(&self.history).push(record.clone());

        if !record.has_refresh_token() {
            return Err(TokenError::NoRefreshToken.into());
        }

        if let Some(Err(message)) = lock(&self.outcomes).pop_front() {
            return Err(TokenError::Rejected { message }.into());
        }

        let now = Utc::now();
        let mut updated = record.clone();
        updated.access_token = secrecy::SecretString::new(format!(
            "mock-refreshed-{}",
            rand::random::<u32>()
        ));
        updated.expires_at = Some(now + self.default_lifetime);
        updated.updated_at = now;
        Ok(updated)
    }
}
