//! Token Types
//!
//! Token endpoint responses and the persisted credential record.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

use crate::error::{CredentialError, ProtocolError};
use crate::types::ScopeSet;

/// Token response from the authorization server.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// ID token (OIDC).
    #[serde(default)]
    pub id_token: Option<String>,
    /// Additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// One delegated-access grant.
///
/// Persisted as JSON; timestamps are RFC 3339 in UTC with sub-second
/// precision so a reload yields the same expiry.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Short-lived access token.
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: SecretString,
    /// Long-lived refresh token, absent for grants without offline access.
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<SecretString>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// `None` when the provider gave no lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes.
    pub scopes: ScopeSet,
    /// Client the grant was issued to.
    pub client_id: String,
    pub obtained_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Build a record from an authorization-code exchange.
    ///
    /// When the provider omits `scope`, the requested set is assumed granted.
    pub fn from_token_response(
        response: &TokenResponse,
        client_id: &str,
        requested: &ScopeSet,
        now: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        if response.access_token.is_empty() {
            return Err(CredentialError::Protocol(ProtocolError::InvalidResponse {
                message: "token response has an empty access_token".to_string(),
            }));
        }

        let scopes = response
            .scope
            .as_deref()
            .and_then(|s| ScopeSet::parse(s).ok())
            .unwrap_or_else(|| requested.clone());

        Ok(Self {
            access_token: SecretString::new(response.access_token.clone()),
            refresh_token: response.refresh_token.clone().map(SecretString::new),
            token_type: response.token_type.clone(),
            expires_at: expiry_from(response.expires_in, now),
            scopes,
            client_id: client_id.to_string(),
            obtained_at: now,
            updated_at: now,
        })
    }

    /// Apply a refresh-token exchange in place.
    ///
    /// The refresh token is kept unless the endpoint rotated it; the granted
    /// scope set is kept because the record stays keyed by it.
    pub fn apply_refresh(
        &mut self,
        response: &TokenResponse,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        if response.access_token.is_empty() {
            return Err(CredentialError::Protocol(ProtocolError::InvalidResponse {
                message: "refresh response has an empty access_token".to_string(),
            }));
        }

        self.access_token = SecretString::new(response.access_token.clone());
        if let Some(rotated) = &response.refresh_token {
            self.refresh_token = Some(SecretString::new(rotated.clone()));
        }
        self.token_type = response.token_type.clone();
        self.expires_at = expiry_from(response.expires_in, now);
        self.updated_at = now;
        Ok(())
    }

    /// Access token value, for handing to API clients.
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Check if the access token is past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    /// Check if the access token expires within `buffer` of `now`.
    pub fn expires_within(&self, buffer: std::time::Duration, now: DateTime<Utc>) -> bool {
        let buffer = Duration::from_std(buffer).unwrap_or_else(|_| Duration::zero());
        self.expires_at
            .map(|exp| exp <= now + buffer)
            .unwrap_or(false)
    }

    /// Remaining lifetime in seconds, clamped at zero.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|exp| if exp > now { (exp - now).num_seconds() } else { 0 })
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.expose_secret())
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("obtained_at", &self.obtained_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Token type hint for revocation requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

// Upper bound on a provider-supplied lifetime, keeps date arithmetic in range.
const MAX_LIFETIME_SECS: i64 = 10 * 365 * 24 * 3600;

fn expiry_from(expires_in: Option<u64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| {
        let secs = i64::try_from(secs).unwrap_or(MAX_LIFETIME_SECS).min(MAX_LIFETIME_SECS);
        now + Duration::seconds(secs)
    })
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn serialize_optional_secret<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}
