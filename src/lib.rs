//! Google Credentials Integration Module
//!
//! Credential lifecycle management for the Google APIs used by the video
//! uploader: YouTube for uploads and Sheets for the upload log.
//!
//! # Features
//!
//! - Per-identity, per-scope-set credential cache backed by files
//! - Silent renewal through the refresh grant (RFC 6749 Section 6)
//! - Interactive consent over a loopback redirect with PKCE (RFC 7636)
//! - Revocation of all grants for an identity (RFC 7009)
//! - One consent at a time per cache key, even under concurrent callers
//!
//! # Example
//!
//! ```rust,ignore
//! use integrations_google_credentials::{credential_manager, GoogleService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = credential_manager()
//!         .client_secret_file("config/client_secret.json")
//!         .token_dir(".tokens")
//!         .build()?;
//!
//!     let credential = manager
//!         .acquire_for_service(GoogleService::Combined, "creator@example.com")
//!         .await?;
//!     println!("Authorization: {}", credential.authorization_header());
//!
//!     if !manager.revoke("creator@example.com").await {
//!         eprintln!("Remote revocation incomplete; local copies were removed");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: scopes, cache keys, credential records and client configuration
//! - `error`: error hierarchy and provider error mapping
//! - `core`: HTTP transport and PKCE primitives
//! - `flows`: interactive consent and the refresh grant
//! - `token`: storage, state classification, revocation and the manager
//! - `builders`: fluent builder wiring the production collaborators

pub mod builders;
pub mod core;
pub mod error;
pub mod flows;
pub mod token;
pub mod types;

// Re-export the manager and its builder
pub use builders::{credential_manager, CredentialManagerBuilder};
pub use token::{
    AuthStatus, CredentialManager, CredentialState, RevocationFailure, RevocationReport,
    RevocationWarning,
};

// Re-export errors
pub use error::{
    create_error_from_response, get_user_message, map_token_error, parse_error_response,
    AuthorizationError, ConfigurationError, CredentialError, CredentialResult, NetworkError,
    OAuth2ErrorResponse, ProtocolError, ProviderError, StorageError, TokenError,
};

// Re-export types
pub use types::{
    // Scopes and keys
    scopes, GoogleService, ScopeSet, TokenCacheKey, DEFAULT_IDENTITY,
    // Records
    CredentialRecord, TokenResponse, TokenTypeHint,
    // Configuration
    ClientAuthMethod, ClientIdentity, CredentialManagerConfig, GOOGLE_AUTH_URI,
    GOOGLE_REVOKE_URI, GOOGLE_TOKEN_URI,
    // Consent
    AuthorizationRequest, CallbackParams, PkceMethod, PkceParams, Prompt,
};

// Re-export core components
pub use core::{
    DefaultPkceGenerator, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    MockHttpTransport, PkceGenerator, ReqwestHttpTransport,
};

// Re-export flows
pub use flows::{
    AuthorizationFlowProvider, BrowserLauncher, DefaultTokenRefresher, LoopbackConsentFlow,
    MockAuthorizationFlow, MockTokenRefresher, SystemBrowser, TokenRefresher,
};

// Re-export token storage and revocation
pub use token::{
    DefaultTokenRevoker, FileTokenStore, InMemoryTokenStore, MockTokenRevoker, MockTokenStore,
    TokenRevoker, TokenStore,
};
