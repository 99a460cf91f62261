//! Cache Keys
//!
//! Deterministic storage keys derived from (identity, scope set).

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CredentialError;
use crate::types::ScopeSet;

/// Identity label used when the application does not distinguish accounts.
pub const DEFAULT_IDENTITY: &str = "default";

const KEY_DELIMITER: char = '.';
const SCOPE_DIGEST_BYTES: usize = 16;

/// Storage key for one (identity, scope set) grant.
///
/// Layout: `<hex(identity)>.<hex(sha256(scopes)[..16])>`. Both halves only
/// use `[0-9a-f]`, so the delimiter is unambiguous and the key is safe to
/// use as a file name on every platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenCacheKey {
    identity: String,
    value: String,
}

impl TokenCacheKey {
    /// Derive the key for an identity and scope set.
    pub fn derive(identity: &str, scopes: &ScopeSet) -> Result<Self, CredentialError> {
        validate_identity(identity)?;

        let mut hasher = Sha256::new();
        for (i, scope) in scopes.iter().enumerate() {
            if i > 0 {
                hasher.update(b"\n");
            }
            hasher.update(scope.as_bytes());
        }
        let digest = hasher.finalize();

        let value = format!(
            "{}{}{}",
            identity_prefix(identity),
            KEY_DELIMITER,
            hex::encode(&digest[..SCOPE_DIGEST_BYTES])
        );

        Ok(Self {
            identity: identity.to_string(),
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Recover the identity label from a stored key string.
    pub fn identity_of(key: &str) -> Option<String> {
        let (encoded, digest) = key.split_once(KEY_DELIMITER)?;
        if digest.len() != SCOPE_DIGEST_BYTES * 2 || hex::decode(digest).is_err() {
            return None;
        }
        let bytes = hex::decode(encoded).ok()?;
        String::from_utf8(bytes).ok().filter(|s| !s.is_empty())
    }

    /// Check whether a stored key string belongs to `identity`.
    pub fn belongs_to(key: &str, identity: &str) -> bool {
        Self::identity_of(key).as_deref() == Some(identity)
    }
}

impl fmt::Display for TokenCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

fn identity_prefix(identity: &str) -> String {
    hex::encode(identity.as_bytes())
}

pub(crate) fn validate_identity(identity: &str) -> Result<(), CredentialError> {
    if identity.trim().is_empty() {
        return Err(CredentialError::invalid_request(
            "identity label must not be empty",
        ));
    }
    Ok(())
}
