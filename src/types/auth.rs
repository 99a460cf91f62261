//! Authorization Types
//!
//! Types for the interactive consent flow.

use secrecy::{ExposeSecret, SecretString};

/// Prompt behavior for authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prompt {
    /// Do not display any authentication or consent UI.
    None,
    /// Force consent screen. Google only returns a refresh token on consent.
    Consent,
    /// Force account selection.
    SelectAccount,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Consent => "consent",
            Self::SelectAccount => "select_account",
        }
    }
}

/// PKCE challenge method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PkceMethod {
    /// SHA-256 hash.
    #[default]
    S256,
    Plain,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// PKCE parameters.
#[derive(Clone)]
pub struct PkceParams {
    /// Code verifier, sent only in the code exchange.
    pub code_verifier: SecretString,
    /// Code challenge, sent in the authorization URL.
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
}

impl PkceParams {
    pub fn verifier(&self) -> &str {
        self.code_verifier.expose_secret()
    }
}

impl std::fmt::Debug for PkceParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceParams")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("code_challenge_method", &self.code_challenge_method)
            .finish()
    }
}

/// A prepared authorization request, one per consent attempt.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    /// URL the user opens in a browser.
    pub url: String,
    /// Expected `state` on the redirect.
    pub state: String,
    /// Loopback redirect URI, repeated verbatim in the code exchange.
    pub redirect_uri: String,
    pub pkce: PkceParams,
}
