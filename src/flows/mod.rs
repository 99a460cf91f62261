//! Authorization Flows
//!
//! - **Interactive consent** (RFC 6749 Section 4.1 with RFC 7636 PKCE) over a loopback redirect
//! - **Refresh grant** (RFC 6749 Section 6)

pub mod consent;
pub mod refresh;
mod token_request;

pub use consent::{
    AuthorizationFlowProvider, BrowserLauncher, LoopbackConsentFlow, MockAuthorizationFlow,
    SystemBrowser,
};
pub use refresh::{DefaultTokenRefresher, MockTokenRefresher, TokenRefresher};
