//! Configuration Types
//!
//! Client identity descriptor and manager configuration.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, CredentialError};

/// Google authorization endpoint.
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
/// Google token endpoint.
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Google revocation endpoint.
pub const GOOGLE_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

/// Default configuration values.
pub const DEFAULT_CLIENT_SECRET_FILE: &str = "config/client_secret.json";
pub const DEFAULT_TOKEN_DIR: &str = ".tokens";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;

/// Client authentication method at the token endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// client_id and client_secret in request body.
    #[default]
    ClientSecretPost,
    /// HTTP Basic Authentication header.
    ClientSecretBasic,
    /// No client authentication (public client).
    None,
}

/// OAuth client descriptor, loaded once and never mutated.
#[derive(Clone)]
pub struct ClientIdentity {
    /// Client identifier.
    pub client_id: String,
    /// Client secret. Google "installed" clients have one even though it is not confidential.
    pub client_secret: Option<SecretString>,
    /// Authorization endpoint URL.
    pub auth_uri: String,
    /// Token endpoint URL.
    pub token_uri: String,
    /// Redirect URIs registered for the client.
    pub redirect_uris: Vec<String>,
    /// Client authentication method.
    pub auth_method: ClientAuthMethod,
}

/// On-disk layout of a Google client secrets file.
#[derive(Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecretsSection>,
    #[serde(default)]
    web: Option<ClientSecretsSection>,
}

#[derive(Deserialize)]
struct ClientSecretsSection {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl ClientIdentity {
    /// Create a client identity for Google's endpoints.
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.map(SecretString::new),
            auth_uri: GOOGLE_AUTH_URI.to_string(),
            token_uri: GOOGLE_TOKEN_URI.to_string(),
            redirect_uris: Vec::new(),
            auth_method: ClientAuthMethod::ClientSecretPost,
        }
    }

    /// Override the endpoints (tests, non-Google providers).
    pub fn with_endpoints(mut self, auth_uri: impl Into<String>, token_uri: impl Into<String>) -> Self {
        self.auth_uri = auth_uri.into();
        self.token_uri = token_uri.into();
        self
    }

    pub fn with_auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Load a Google client secrets file (`{"installed": {...}}` or `{"web": {...}}`).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigurationError::FileNotFound {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Err(e) => {
                return Err(ConfigurationError::Unreadable {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
                .into());
            }
        };

        Self::from_json_str(&contents)
    }

    /// Parse the client secrets JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, CredentialError> {
        let file: ClientSecretsFile = serde_json::from_str(json).map_err(|e| {
            ConfigurationError::Malformed {
                message: e.to_string(),
            }
        })?;

        let section = file
            .installed
            .or(file.web)
            .ok_or_else(|| ConfigurationError::MissingRequired {
                field: "installed".to_string(),
            })?;

        if section.client_id.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired {
                field: "client_id".to_string(),
            }
            .into());
        }

        let auth_uri = section
            .auth_uri
            .unwrap_or_else(|| GOOGLE_AUTH_URI.to_string());
        let token_uri = section
            .token_uri
            .unwrap_or_else(|| GOOGLE_TOKEN_URI.to_string());
        for endpoint in [&auth_uri, &token_uri] {
            Url::parse(endpoint).map_err(|_| ConfigurationError::InvalidEndpoint {
                url: endpoint.clone(),
            })?;
        }

        let client_secret = section
            .client_secret
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::new);
        let auth_method = if client_secret.is_some() {
            ClientAuthMethod::ClientSecretPost
        } else {
            ClientAuthMethod::None
        };

        Ok(Self {
            client_id: section.client_id,
            client_secret,
            auth_uri,
            token_uri,
            redirect_uris: section.redirect_uris,
            auth_method,
        })
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .field("redirect_uris", &self.redirect_uris)
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// Credential manager configuration.
#[derive(Clone, Debug)]
pub struct CredentialManagerConfig {
    /// Path of the client secrets file.
    pub client_secret_file: PathBuf,
    /// Directory holding persisted credential records.
    pub token_dir: PathBuf,
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_buffer: Duration,
    /// HTTP timeout for token and revocation requests.
    pub timeout: Duration,
    /// Upper bound on waiting for the browser callback. `None` waits indefinitely.
    pub callback_timeout: Option<Duration>,
    /// Token revocation endpoint.
    pub revocation_endpoint: String,
}

impl Default for CredentialManagerConfig {
    fn default() -> Self {
        Self {
            client_secret_file: PathBuf::from(DEFAULT_CLIENT_SECRET_FILE),
            token_dir: PathBuf::from(DEFAULT_TOKEN_DIR),
            refresh_buffer: Duration::from_secs(DEFAULT_REFRESH_BUFFER_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            callback_timeout: None,
            revocation_endpoint: GOOGLE_REVOKE_URI.to_string(),
        }
    }
}
