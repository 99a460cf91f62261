//! Credential Error Types
//!
//! Error hierarchy for the credential lifecycle manager and its collaborators.
//!
//! Only [`CredentialError::ConfigurationMissing`] and
//! [`CredentialError::AuthenticationFailed`] are expected to reach callers of
//! the manager; everything else is absorbed or wrapped on the way out.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Root error type for credential operations.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Client configuration missing: {0}")]
    ConfigurationMissing(#[from] ConfigurationError),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthorizationError),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Token revocation failed: {message}")]
    RevocationFailed { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl CredentialError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing(_) => "CRED_CONFIG",
            Self::AuthenticationFailed(_) => "CRED_AUTH",
            Self::RefreshFailed(_) => "CRED_REFRESH",
            Self::Storage(_) => "CRED_STORAGE",
            Self::Network(_) => "CRED_NETWORK",
            Self::Protocol(_) => "CRED_PROTOCOL",
            Self::Provider(_) => "CRED_PROVIDER",
            Self::RevocationFailed { .. } => "CRED_REVOKE",
            Self::InvalidRequest { .. } => "CRED_INVALID_REQUEST",
        }
    }

    /// Check if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Provider(ProviderError::ServerError { .. }) => true,
            Self::Provider(ProviderError::TemporarilyUnavailable { .. }) => true,
            Self::AuthenticationFailed(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if the user has to act (fix setup or complete consent) before retrying.
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationMissing(_) | Self::AuthenticationFailed(_)
        )
    }

    /// Check if the stored grant is dead and a new consent is required.
    pub fn needs_reauth(&self) -> bool {
        match self {
            Self::RefreshFailed(_) => true,
            Self::Provider(ProviderError::InvalidGrant { .. }) => true,
            Self::AuthenticationFailed(AuthorizationError::AccessDenied { .. }) => true,
            _ => false,
        }
    }

    /// Get a message suitable for showing in the application UI.
    pub fn user_message(&self) -> String {
        get_user_message(self)
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

/// Client identity configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Client secrets file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Client secrets file unreadable: {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("Client secrets file malformed: {message}")]
    Malformed { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Interactive consent flow error.
#[derive(Error, Debug)]
pub enum AuthorizationError {
    #[error("Access denied by user")]
    AccessDenied { error_description: Option<String> },

    #[error("State parameter mismatch (possible CSRF attack)")]
    StateMismatch,

    #[error("Authorization callback failed: {message}")]
    CallbackFailed { message: String },

    #[error("Timed out after {timeout:?} waiting for the authorization callback")]
    CallbackTimeout { timeout: Duration },

    #[error("Could not open the system browser: {message}")]
    BrowserLaunchFailed { message: String },

    #[error("Granted scopes are missing: {}", missing.join(" "))]
    InsufficientScope { missing: Vec<String> },

    #[error("Authorization code exchange failed: {message}")]
    CodeExchangeFailed { message: String },
}

impl AuthorizationError {
    /// Check if re-running the consent flow is a reasonable next step.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CallbackTimeout { .. } | Self::CallbackFailed { .. } | Self::CodeExchangeFailed { .. }
        )
    }
}

/// Token lifecycle error.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh rejected: {message}")]
    Rejected { message: String },
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("HTTP client setup failed: {message}")]
    ClientSetup { message: String },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ClientSetup { .. })
    }
}

/// Protocol/response parsing error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Local token store error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },
}

/// Provider (OAuth2 server) error.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid client credentials")]
    InvalidClient { error_description: Option<String> },

    #[error("Invalid grant: {message}")]
    InvalidGrant { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid scope: {scope}")]
    InvalidScope { scope: String },

    #[error("Unauthorized client for this grant type")]
    UnauthorizedClient { error_description: Option<String> },

    #[error("Server error: {message}")]
    ServerError { message: String },

    #[error("Server temporarily unavailable")]
    TemporarilyUnavailable { retry_after: Option<Duration> },
}

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// OAuth2 error response from provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

/// Map token endpoint error response to error type.
pub fn map_token_error(response: &OAuth2ErrorResponse) -> ProviderError {
    let description = |fallback: &str| {
        response
            .error_description
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    };

    match response.error.as_str() {
        "invalid_client" => ProviderError::InvalidClient {
            error_description: response.error_description.clone(),
        },
        "invalid_grant" => ProviderError::InvalidGrant {
            message: description("Invalid grant"),
        },
        "invalid_scope" => ProviderError::InvalidScope {
            scope: response.error_description.clone().unwrap_or_default(),
        },
        "unauthorized_client" => ProviderError::UnauthorizedClient {
            error_description: response.error_description.clone(),
        },
        "server_error" => ProviderError::ServerError {
            message: description("Server error"),
        },
        "temporarily_unavailable" => ProviderError::TemporarilyUnavailable { retry_after: None },
        _ => ProviderError::InvalidRequest {
            message: description(&response.error),
        },
    }
}

/// Parse error response from HTTP body.
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    serde_json::from_str(body).ok()
}

/// Create error from a non-success HTTP response.
pub fn create_error_from_response(status: u16, body: &str) -> CredentialError {
    if let Some(response) = parse_error_response(body) {
        return CredentialError::Provider(map_token_error(&response));
    }

    let error = match status {
        400 => ProviderError::InvalidRequest {
            message: "Bad request".to_string(),
        },
        401 => ProviderError::InvalidClient {
            error_description: Some("Unauthorized".to_string()),
        },
        403 => ProviderError::UnauthorizedClient {
            error_description: Some("Forbidden".to_string()),
        },
        429 => ProviderError::TemporarilyUnavailable {
            retry_after: Some(Duration::from_secs(60)),
        },
        _ => ProviderError::ServerError {
            message: format!("HTTP {}", status),
        },
    };

    CredentialError::Provider(error)
}

/// Get user-friendly error message.
pub fn get_user_message(error: &CredentialError) -> String {
    match error {
        CredentialError::ConfigurationMissing(ConfigurationError::FileNotFound { path }) => format!(
            "Google API client secrets were not found at {}. Download the OAuth client \
             (type \"Desktop app\") JSON from the Google Cloud console and save it there.",
            path.display()
        ),
        CredentialError::ConfigurationMissing(_) => {
            "The Google API client secrets file is invalid. Download it again from the \
             Google Cloud console."
                .to_string()
        }
        CredentialError::AuthenticationFailed(AuthorizationError::AccessDenied { .. }) => {
            "Access was denied. Please sign in again and grant the requested permissions."
                .to_string()
        }
        CredentialError::AuthenticationFailed(AuthorizationError::InsufficientScope { .. }) => {
            "Not all requested permissions were granted. Please sign in again and allow \
             access to YouTube and Google Sheets."
                .to_string()
        }
        CredentialError::AuthenticationFailed(AuthorizationError::CallbackTimeout { .. }) => {
            "Sign-in was not completed in time. Please try again.".to_string()
        }
        CredentialError::AuthenticationFailed(AuthorizationError::BrowserLaunchFailed {
            ..
        }) => "The web browser could not be opened for sign-in.".to_string(),
        CredentialError::AuthenticationFailed(_) => {
            "Sign-in did not complete. Please try again.".to_string()
        }
        CredentialError::RefreshFailed(_) => {
            "Your session cannot be renewed. Please sign in again.".to_string()
        }
        CredentialError::RevocationFailed { .. } => {
            "Google could not be reached to revoke access. The local sign-in was removed; \
             you can also remove the app from your Google account settings."
                .to_string()
        }
        CredentialError::Network(NetworkError::Timeout { .. }) => {
            "The request timed out. Please check your connection and try again.".to_string()
        }
        CredentialError::Provider(ProviderError::ServerError { .. })
        | CredentialError::Provider(ProviderError::TemporarilyUnavailable { .. }) => {
            "The Google sign-in service is temporarily unavailable. Please try again later."
                .to_string()
        }
        _ => "An authentication error occurred. Please try again.".to_string(),
    }
}
