//! Credential Types
//!
//! Core type definitions: scopes, cache keys, credential records and client configuration.

pub mod auth;
pub mod callback;
pub mod config;
pub mod key;
pub mod scope;
pub mod token;

pub use auth::*;
pub use callback::*;
pub use config::*;
pub use key::*;
pub use scope::*;
pub use token::*;
