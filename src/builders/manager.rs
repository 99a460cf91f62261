//! Manager Builder
//!
//! Fluent builder for [`CredentialManager`] and its collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::core::{HttpTransport, ReqwestHttpTransport};
use crate::error::{ConfigurationError, CredentialError, CredentialResult};
use crate::flows::{
    AuthorizationFlowProvider, BrowserLauncher, DefaultTokenRefresher, LoopbackConsentFlow,
    SystemBrowser, TokenRefresher,
};
use crate::token::{CredentialManager, DefaultTokenRevoker, FileTokenStore, TokenRevoker, TokenStore};
use crate::types::{ClientIdentity, CredentialManagerConfig};

/// Credential manager builder.
///
/// Anything not injected gets its production implementation: a
/// [`FileTokenStore`] under `token_dir`, a [`LoopbackConsentFlow`] with the
/// system browser, and reqwest-backed refresh and revocation.
#[derive(Default)]
pub struct CredentialManagerBuilder {
    config: CredentialManagerConfig,
    client: Option<ClientIdentity>,
    store: Option<Arc<dyn TokenStore>>,
    flow: Option<Arc<dyn AuthorizationFlowProvider>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    revoker: Option<Arc<dyn TokenRevoker>>,
    transport: Option<Arc<dyn HttpTransport>>,
    browser: Option<Arc<dyn BrowserLauncher>>,
}

impl CredentialManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: CredentialManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the Google client secrets file.
    pub fn client_secret_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.client_secret_file = path.into();
        self
    }

    /// Directory for persisted credential records.
    pub fn token_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.token_dir = dir.into();
        self
    }

    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.config.refresh_buffer = buffer;
        self
    }

    /// HTTP timeout for refresh, code exchange and revocation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.config.callback_timeout = Some(timeout);
        self
    }

    pub fn revocation_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.revocation_endpoint = endpoint.into();
        self
    }

    /// Use this client identity instead of reading the secrets file.
    pub fn client_identity(mut self, client: ClientIdentity) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn flow(mut self, flow: Arc<dyn AuthorizationFlowProvider>) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn revoker(mut self, revoker: Arc<dyn TokenRevoker>) -> Self {
        self.revoker = Some(revoker);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Build the manager.
    pub fn build(self) -> CredentialResult<CredentialManager> {
        let config = self.config;

        if self.revoker.is_none() {
            Url::parse(&config.revocation_endpoint).map_err(|_| {
                ConfigurationError::InvalidEndpoint {
                    url: config.revocation_endpoint.clone(),
                }
            })?;
        }
        if config.timeout.is_zero() {
            return Err(CredentialError::invalid_request("timeout must be non-zero"));
        }

        let mut transport = self.transport;
        let mut http = || -> CredentialResult<Arc<dyn HttpTransport>> {
            if let Some(transport) = &transport {
                return Ok(transport.clone());
            }
            let created: Arc<dyn HttpTransport> =
                Arc::new(ReqwestHttpTransport::with_timeout(config.timeout)?);
            transport = Some(created.clone());
            Ok(created)
        };

        let flow: Arc<dyn AuthorizationFlowProvider> = match self.flow {
            Some(flow) => flow,
            None => {
                let browser: Arc<dyn BrowserLauncher> = match self.browser {
                    Some(browser) => browser,
                    None => Arc::new(SystemBrowser),
                };
                Arc::new(
                    LoopbackConsentFlow::new(http()?, browser)
                        .with_callback_timeout(config.callback_timeout),
                )
            }
        };
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(DefaultTokenRefresher::new(http()?)),
        };
        let revoker: Arc<dyn TokenRevoker> = match self.revoker {
            Some(revoker) => revoker,
            None => Arc::new(DefaultTokenRevoker::new(
                config.revocation_endpoint.clone(),
                http()?,
            )),
        };
        let store: Arc<dyn TokenStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileTokenStore::new(config.token_dir.clone())),
        };

        Ok(CredentialManager::new(
            config,
            self.client,
            store,
            flow,
            refresher,
            revoker,
        ))
    }
}

/// Create a new credential manager builder.
pub fn credential_manager() -> CredentialManagerBuilder {
    CredentialManagerBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MockHttpTransport;
    use crate::flows::{MockAuthorizationFlow, MockTokenRefresher};
    use crate::token::{InMemoryTokenStore, MockTokenRevoker};
    use crate::types::ScopeSet;

    #[test]
    fn test_builder_defaults() {
        let manager = credential_manager().build().unwrap();
        let config = manager.config();
        assert_eq!(config.token_dir, PathBuf::from(".tokens"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_overrides() {
        let manager = credential_manager()
            .client_secret_file("secrets/client.json")
            .token_dir("/tmp/tokens")
            .refresh_buffer(Duration::from_secs(60))
            .callback_timeout(Duration::from_secs(120))
            .transport(Arc::new(MockHttpTransport::new()))
            .build()
            .unwrap();

        let config = manager.config();
        assert_eq!(config.client_secret_file, PathBuf::from("secrets/client.json"));
        assert_eq!(config.refresh_buffer, Duration::from_secs(60));
        assert_eq!(config.callback_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_builder_rejects_bad_revocation_endpoint() {
        let result = credential_manager().revocation_endpoint("not a url").build();
        assert!(matches!(
            result,
            Err(CredentialError::ConfigurationMissing(ConfigurationError::InvalidEndpoint { .. }))
        ));

        let result = credential_manager().timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(CredentialError::InvalidRequest { .. })));
    }

    #[tokio::test]
    async fn test_builder_injected_collaborators() {
        let flow = Arc::new(MockAuthorizationFlow::new());
        let manager = credential_manager()
            .client_identity(ClientIdentity::new("cid", None))
            .store(Arc::new(InMemoryTokenStore::new()))
            .flow(flow.clone())
            .refresher(Arc::new(MockTokenRefresher::new()))
            .revoker(Arc::new(MockTokenRevoker::new()))
            .build()
            .unwrap();

        let scopes = ScopeSet::new(["videos.upload"]).unwrap();
        manager.acquire_default(&scopes).await.unwrap();
        assert!(manager.check_cached(&scopes, "default").await);
        assert_eq!(flow.call_count(), 1);
    }
}
