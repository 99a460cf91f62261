//! Credential State
//!
//! Classification of a looked-up record into the lifecycle state that
//! decides what the manager does next.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::{CredentialRecord, ScopeSet};

/// Lifecycle state of the grant for one cache key.
#[derive(Clone, Debug)]
pub enum CredentialState {
    /// Nothing usable; a full consent is required.
    Missing,
    /// Usable as is.
    Valid(CredentialRecord),
    /// Expired or about to, with a refresh token to renew it.
    Expired(CredentialRecord),
}

impl CredentialState {
    /// Classify a record against the requested scopes at `now`.
    ///
    /// Records that do not cover `requested`, and expired records that
    /// cannot be refreshed, are `Missing`.
    pub fn classify(
        record: Option<CredentialRecord>,
        requested: &ScopeSet,
        now: DateTime<Utc>,
        refresh_buffer: Duration,
    ) -> Self {
        let Some(record) = record else {
            return Self::Missing;
        };

        if !record.scopes.contains_all(requested) {
            return Self::Missing;
        }

        if !record.expires_within(refresh_buffer, now) {
            return Self::Valid(record);
        }

        if record.has_refresh_token() {
            Self::Expired(record)
        } else if record.is_expired(now) {
            Self::Missing
        } else {
            // Inside the buffer but not yet expired: still usable until it lapses.
            Self::Valid(record)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Valid(_) => "valid",
            Self::Expired(_) => "expired",
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenResponse;
    use std::collections::HashMap;

    const BUFFER: Duration = Duration::from_secs(300);

    fn record(expires_in: Option<u64>, refresh: bool, scopes: &[&str]) -> CredentialRecord {
        let response = TokenResponse {
            access_token: "a".to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token: refresh.then(|| "r".to_string()),
            scope: None,
            id_token: None,
            extra: HashMap::new(),
        };
        CredentialRecord::from_token_response(
            &response,
            "cid",
            &ScopeSet::new(scopes.iter().copied()).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    fn upload() -> ScopeSet {
        ScopeSet::new(["videos.upload"]).unwrap()
    }

    #[test]
    fn test_missing_when_absent_or_scopes_lacking() {
        let now = Utc::now();
        assert!(matches!(
            CredentialState::classify(None, &upload(), now, BUFFER),
            CredentialState::Missing
        ));
        let other = record(Some(3600), true, &["spreadsheets"]);
        assert!(matches!(
            CredentialState::classify(Some(other), &upload(), now, BUFFER),
            CredentialState::Missing
        ));
    }

    #[test]
    fn test_valid_superset_and_no_expiry() {
        let now = Utc::now();
        let superset = record(Some(3600), false, &["videos.upload", "spreadsheets"]);
        assert!(CredentialState::classify(Some(superset), &upload(), now, BUFFER).is_valid());

        let forever = record(None, false, &["videos.upload"]);
        assert!(CredentialState::classify(Some(forever), &upload(), now, BUFFER).is_valid());
    }

    #[test]
    fn test_expired_with_refresh_token() {
        let now = Utc::now();
        let soon = record(Some(60), true, &["videos.upload"]);
        assert_eq!(
            CredentialState::classify(Some(soon), &upload(), now, BUFFER).as_str(),
            "expired"
        );

        let past = record(Some(0), true, &["videos.upload"]);
        assert_eq!(
            CredentialState::classify(Some(past), &upload(), now + chrono::Duration::seconds(1), BUFFER)
                .as_str(),
            "expired"
        );
    }

    #[test]
    fn test_expired_without_refresh_token_is_missing() {
        let now = Utc::now();
        let past = record(Some(0), false, &["videos.upload"]);
        assert!(matches!(
            CredentialState::classify(Some(past), &upload(), now + chrono::Duration::seconds(1), BUFFER),
            CredentialState::Missing
        ));

        let soon = record(Some(60), false, &["videos.upload"]);
        assert!(CredentialState::classify(Some(soon), &upload(), now, BUFFER).is_valid());
    }
}
