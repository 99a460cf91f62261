//! PKCE and State
//!
//! RFC 7636 code verifier/challenge generation and the anti-forgery `state` value.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use secrecy::SecretString;
use sha2::{Digest, Sha256};

use crate::error::CredentialError;
use crate::types::{PkceMethod, PkceParams};

const DEFAULT_VERIFIER_LENGTH: usize = 64;
const STATE_BYTES: usize = 32;

/// PKCE generator interface (for dependency injection).
pub trait PkceGenerator: Send + Sync {
    /// Generate PKCE parameters.
    fn generate(&self, method: PkceMethod) -> PkceParams;
}

/// Default PKCE generator implementation.
pub struct DefaultPkceGenerator {
    verifier_length: usize,
}

impl DefaultPkceGenerator {
    pub fn new() -> Self {
        Self {
            verifier_length: DEFAULT_VERIFIER_LENGTH,
        }
    }

    /// Verifier length must be within 43..=128 characters.
    pub fn with_length(length: usize) -> Result<Self, CredentialError> {
        if !(43..=128).contains(&length) {
            return Err(CredentialError::invalid_request(
                "PKCE verifier length must be between 43 and 128",
            ));
        }
        Ok(Self {
            verifier_length: length,
        })
    }

    fn generate_verifier(&self) -> String {
        let mut rng = rand::thread_rng();
        let bytes_needed = (self.verifier_length * 3 + 3) / 4;
        let random_bytes: Vec<u8> = (0..bytes_needed).map(|_| rng.gen()).collect();

        let mut encoded = URL_SAFE_NO_PAD.encode(&random_bytes);
        encoded.truncate(self.verifier_length);
        encoded
    }
}

impl Default for DefaultPkceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceGenerator for DefaultPkceGenerator {
    fn generate(&self, method: PkceMethod) -> PkceParams {
        let code_verifier = self.generate_verifier();
        let code_challenge = compute_challenge(&code_verifier, method);

        PkceParams {
            code_verifier: SecretString::new(code_verifier),
            code_challenge,
            code_challenge_method: method,
        }
    }
}

/// Compute the challenge for a verifier.
pub fn compute_challenge(verifier: &str, method: PkceMethod) -> String {
    match method {
        PkceMethod::Plain => verifier.to_string(),
        PkceMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
    }
}

/// Validate PKCE verifier format.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

/// Random URL-safe `state` value for one authorization attempt.
pub fn generate_state() -> String {
    let bytes: [u8; STATE_BYTES] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare two state values without short-circuiting on the first mismatch.
pub fn state_matches(expected: &str, received: &str) -> bool {
    let (a, b) = (expected.as_bytes(), received.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
