//! Scope Types
//!
//! Permission scope sets and the Google API scopes used by the uploader.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::CredentialError;

/// Google API scopes used by the application.
pub mod scopes {
    /// Upload videos to YouTube.
    pub const YOUTUBE_UPLOAD: &str = "https://www.googleapis.com/auth/youtube.upload";

    /// Manage the YouTube account (playlists, video metadata).
    pub const YOUTUBE: &str = "https://www.googleapis.com/auth/youtube";

    /// Read and write Google Sheets spreadsheets.
    pub const SPREADSHEETS: &str = "https://www.googleapis.com/auth/spreadsheets";
}

/// A non-empty, sorted, de-duplicated set of permission scopes.
///
/// Stored records are keyed by their exact originating set, so two sets
/// that differ by a single scope are different grants.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Build a scope set, rejecting empty sets and blank or whitespace-bearing scopes.
    pub fn new<I, S>(scopes: I) -> Result<Self, CredentialError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for scope in scopes {
            let scope = scope.as_ref().trim();
            if scope.is_empty() {
                return Err(CredentialError::invalid_request("scope must not be blank"));
            }
            if scope.chars().any(char::is_whitespace) {
                return Err(CredentialError::invalid_request(format!(
                    "scope must not contain whitespace: {scope:?}"
                )));
            }
            set.insert(scope.to_string());
        }

        if set.is_empty() {
            return Err(CredentialError::invalid_request(
                "at least one scope is required",
            ));
        }

        Ok(Self(set))
    }

    /// Parse a space-delimited OAuth `scope` value.
    pub fn parse(scope: &str) -> Result<Self, CredentialError> {
        Self::new(scope.split_whitespace())
    }

    /// Iterate scopes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true for a set built through [`ScopeSet::new`].
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Superset test: every scope of `other` is in `self`.
    pub fn contains_all(&self, other: &ScopeSet) -> bool {
        other.0.is_subset(&self.0)
    }

    /// Scopes of `requested` not present in `self`.
    pub fn missing_from(&self, requested: &ScopeSet) -> Vec<String> {
        requested.0.difference(&self.0).cloned().collect()
    }

    /// Union of two sets.
    pub fn union(&self, other: &ScopeSet) -> ScopeSet {
        ScopeSet(self.0.union(&other.0).cloned().collect())
    }

    /// Space-delimited form used on the wire.
    pub fn to_scope_string(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl TryFrom<Vec<String>> for ScopeSet {
    type Error = CredentialError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScopeSet> for Vec<String> {
    fn from(value: ScopeSet) -> Self {
        value.0.into_iter().collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_scope_string())
    }
}

/// Google services the uploader talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GoogleService {
    /// YouTube Data API (upload + manage).
    YouTube,
    /// Google Sheets API.
    Sheets,
    /// Both APIs under a single grant.
    Combined,
}

impl GoogleService {
    /// Scopes requested for this service.
    pub fn scopes(&self) -> ScopeSet {
        let list: &[&str] = match self {
            Self::YouTube => &[scopes::YOUTUBE_UPLOAD, scopes::YOUTUBE],
            Self::Sheets => &[scopes::SPREADSHEETS],
            Self::Combined => &[scopes::YOUTUBE_UPLOAD, scopes::YOUTUBE, scopes::SPREADSHEETS],
        };
        ScopeSet(list.iter().map(|s| s.to_string()).collect())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YouTube => "youtube",
            Self::Sheets => "sheets",
            Self::Combined => "combined",
        }
    }
}
