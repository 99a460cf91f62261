//! Core Components
//!
//! HTTP transport and PKCE primitives shared by the flows.

pub mod pkce;
pub mod transport;

pub use pkce::*;
pub use transport::*;
