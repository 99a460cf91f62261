//! Token Management
//!
//! Credential lifecycle: storage, state classification, revocation and the manager tying them together.

pub mod manager;
pub mod revocation;
pub mod state;
pub mod storage;

pub use manager::{AuthStatus, CredentialManager, RevocationFailure, RevocationReport, RevocationWarning};
pub use revocation::{DefaultTokenRevoker, MockTokenRevoker, TokenRevoker};
pub use state::CredentialState;
pub use storage::{FileTokenStore, InMemoryTokenStore, MockTokenStore, TokenStore};
