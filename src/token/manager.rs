//! Credential Manager
//!
//! Obtains, caches, refreshes, persists and revokes credential records,
//! running at most one interactive consent per missing grant.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, instrument, warn, Span};

use crate::error::{AuthorizationError, CredentialError, CredentialResult, StorageError};
use crate::flows::{AuthorizationFlowProvider, TokenRefresher};
use crate::token::{CredentialState, TokenRevoker, TokenStore};
use crate::types::{
    validate_identity, ClientIdentity, CredentialManagerConfig, CredentialRecord, GoogleService,
    ScopeSet, TokenCacheKey, DEFAULT_IDENTITY,
};

/// Non-fatal outcome of a revocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevocationWarning {
    /// The provider could not be told; the grant may stay live remotely
    /// until it expires or the user removes it from their account.
    RevocationIncomplete { key: String, message: String },
}

/// Local cleanup step that failed during revocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevocationFailure {
    /// `None` when the store could not be listed at all.
    pub key: Option<String>,
    pub message: String,
}

/// Per-key outcome of [`CredentialManager::revoke_with_report`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RevocationReport {
    pub identity: String,
    /// Keys whose local state was removed.
    pub revoked_keys: Vec<String>,
    pub warnings: Vec<RevocationWarning>,
    pub failures: Vec<RevocationFailure>,
}

impl RevocationReport {
    /// True when every remote and local step succeeded.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty() && self.failures.is_empty()
    }
}

/// Non-interactive authorization summary for one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthStatus {
    pub identity: String,
    pub youtube: bool,
    pub sheets: bool,
    /// Earliest expiry among the usable records.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthStatus {
    pub fn is_fully_authorized(&self) -> bool {
        self.youtube && self.sheets
    }
}

/// Credential lifecycle manager.
pub struct CredentialManager {
    config: CredentialManagerConfig,
    client: OnceCell<ClientIdentity>,
    store: Arc<dyn TokenStore>,
    flow: Arc<dyn AuthorizationFlowProvider>,
    refresher: Arc<dyn TokenRefresher>,
    revoker: Arc<dyn TokenRevoker>,
    cache: RwLock<HashMap<String, CredentialRecord>>,
    /// Keys dropped locally whose stored copy could not be deleted.
    revoked: RwLock<HashSet<String>>,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialManager {
    /// Assemble a manager from its collaborators.
    ///
    /// Without an explicit `client`, the identity is read from
    /// `config.client_secret_file` on first use.
    pub fn new(
        config: CredentialManagerConfig,
        client: Option<ClientIdentity>,
        store: Arc<dyn TokenStore>,
        flow: Arc<dyn AuthorizationFlowProvider>,
        refresher: Arc<dyn TokenRefresher>,
        revoker: Arc<dyn TokenRevoker>,
    ) -> Self {
        Self {
            config,
            client: client.map(OnceCell::from).unwrap_or_default(),
            store,
            flow,
            refresher,
            revoker,
            cache: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashSet::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CredentialManagerConfig {
        &self.config
    }

    /// Client identity, loaded once. A failed load is retried on the next call.
    pub async fn client_identity(&self) -> CredentialResult<&ClientIdentity> {
        self.client
            .get_or_try_init(|| ClientIdentity::from_file(&self.config.client_secret_file))
            .await
    }

    /// Return a usable record for `scopes` and `identity`, running consent if needed.
    #[instrument(skip_all, fields(identity = %identity, key = tracing::field::Empty))]
    pub async fn acquire(
        &self,
        scopes: &ScopeSet,
        identity: &str,
    ) -> CredentialResult<CredentialRecord> {
        let key = TokenCacheKey::derive(identity, scopes)?;
        Span::current().record("key", key.as_str());

        let guard = self.key_guard(key.as_str()).await;
        let _held = guard.lock().await;

        let record = self.lookup(key.as_str()).await;
        match CredentialState::classify(record, scopes, Utc::now(), self.config.refresh_buffer) {
            CredentialState::Valid(record) => {
                debug!("Using cached credentials");
                return Ok(record);
            }
            CredentialState::Expired(record) => match self.refresh(key.as_str(), &record).await {
                Ok(refreshed) => return Ok(refreshed),
                Err(e @ CredentialError::ConfigurationMissing(_)) => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Refresh failed, discarding credentials");
                    self.discard(key.as_str()).await;
                }
            },
            CredentialState::Missing => debug!("No usable credentials cached"),
        }

        self.consent(key.as_str(), scopes, identity).await
    }

    /// [`acquire`](Self::acquire) for the default identity.
    pub async fn acquire_default(&self, scopes: &ScopeSet) -> CredentialResult<CredentialRecord> {
        self.acquire(scopes, DEFAULT_IDENTITY).await
    }

    /// [`acquire`](Self::acquire) with a service's scope set.
    pub async fn acquire_for_service(
        &self,
        service: GoogleService,
        identity: &str,
    ) -> CredentialResult<CredentialRecord> {
        self.acquire(&service.scopes(), identity).await
    }

    /// Whether a usable record exists, refreshing an expired one if possible.
    /// Never runs consent.
    pub async fn check_cached(&self, scopes: &ScopeSet, identity: &str) -> bool {
        self.usable_record(scopes, identity).await.is_some()
    }

    /// Revoke every grant held for `identity`. Returns whether all steps succeeded.
    pub async fn revoke(&self, identity: &str) -> bool {
        match self.revoke_with_report(identity).await {
            Ok(report) => report.is_complete(),
            Err(e) => {
                warn!(error = %e, "Revocation rejected");
                false
            }
        }
    }

    /// Revoke every grant held for `identity` and report each step.
    ///
    /// Local state is always removed, even when the provider is unreachable.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn revoke_with_report(&self, identity: &str) -> CredentialResult<RevocationReport> {
        validate_identity(identity)?;

        let mut report = RevocationReport {
            identity: identity.to_string(),
            ..Default::default()
        };

        let mut keys = BTreeSet::new();
        match self.store.list_keys().await {
            Ok(stored) => keys.extend(
                stored
                    .into_iter()
                    .filter(|k| TokenCacheKey::belongs_to(k, identity)),
            ),
            Err(e) => {
                warn!(error = %e, "Could not list stored credentials");
                report.failures.push(RevocationFailure {
                    key: None,
                    message: e.to_string(),
                });
            }
        }
        keys.extend(
            self.cache
                .read()
                .await
                .keys()
                .filter(|k| TokenCacheKey::belongs_to(k, identity))
                .cloned(),
        );

        for key in keys {
            self.revoke_key(&key, &mut report).await;
        }

        info!(
            revoked = report.revoked_keys.len(),
            warnings = report.warnings.len(),
            failures = report.failures.len(),
            "Revocation finished"
        );
        Ok(report)
    }

    /// Sorted identity labels that have stored or cached credentials.
    pub async fn known_identities(&self) -> CredentialResult<Vec<String>> {
        let mut identities = BTreeSet::new();
        let stored = self.store.list_keys().await?;
        let revoked = self.revoked.read().await;
        for key in stored.iter().filter(|k| !revoked.contains(*k)) {
            identities.extend(TokenCacheKey::identity_of(key));
        }
        drop(revoked);
        for key in self.cache.read().await.keys() {
            identities.extend(TokenCacheKey::identity_of(key));
        }
        Ok(identities.into_iter().collect())
    }

    /// Authorization summary for one identity. Never runs consent.
    pub async fn status(&self, identity: &str) -> AuthStatus {
        let youtube = self
            .usable_record(&GoogleService::YouTube.scopes(), identity)
            .await;
        let sheets = self
            .usable_record(&GoogleService::Sheets.scopes(), identity)
            .await;
        let combined = self
            .usable_record(&GoogleService::Combined.scopes(), identity)
            .await;

        let expires_at = [&youtube, &sheets, &combined]
            .into_iter()
            .flatten()
            .filter_map(|r| r.expires_at)
            .min();

        AuthStatus {
            identity: identity.to_string(),
            youtube: youtube.is_some() || combined.is_some(),
            sheets: sheets.is_some() || combined.is_some(),
            expires_at,
        }
    }

    async fn usable_record(&self, scopes: &ScopeSet, identity: &str) -> Option<CredentialRecord> {
        let key = TokenCacheKey::derive(identity, scopes).ok()?;
        let guard = self.key_guard(key.as_str()).await;

        let usable = {
            let _held = guard.lock().await;
            let record = self.lookup(key.as_str()).await;
            match CredentialState::classify(record, scopes, Utc::now(), self.config.refresh_buffer) {
                CredentialState::Valid(record) => Some(record),
                CredentialState::Expired(record) => match self.refresh(key.as_str(), &record).await {
                    Ok(refreshed) => Some(refreshed),
                    Err(e) => {
                        debug!(error = %e, "Probe refresh failed");
                        None
                    }
                },
                CredentialState::Missing => None,
            }
        };

        self.release_guard(key.as_str(), guard).await;
        usable
    }

    async fn key_guard(&self, key: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        guards
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a guard handle, removing the map entry when nobody else holds it.
    async fn release_guard(&self, key: &str, guard: Arc<Mutex<()>>) {
        drop(guard);
        let mut guards = self.guards.lock().await;
        if guards.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            guards.remove(key);
        }
    }

    /// Memory first, then the store. Store errors count as a miss.
    async fn lookup(&self, key: &str) -> Option<CredentialRecord> {
        if let Some(record) = self.cache.read().await.get(key) {
            return Some(record.clone());
        }
        if self.revoked.read().await.contains(key) {
            debug!("Stored credentials were revoked, ignoring them");
            return None;
        }

        match self.store.load(key).await {
            Ok(Some(record)) => {
                debug!("Loaded credentials from store");
                self.cache
                    .write()
                    .await
                    .insert(key.to_string(), record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(e @ CredentialError::Storage(StorageError::CorruptedData { .. })) => {
                warn!(error = %e, "Discarding corrupted credential entry");
                if let Err(e) = self.store.delete(key).await {
                    warn!(error = %e, "Could not delete corrupted entry");
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "Credential store read failed, treating as missing");
                None
            }
        }
    }

    async fn refresh(&self, key: &str, record: &CredentialRecord) -> CredentialResult<CredentialRecord> {
        let client = self.client_identity().await?;
        let refreshed = self.refresher.refresh(client, record).await?;
        info!(expires_at = ?refreshed.expires_at, "Access token refreshed");
        self.persist(key, &refreshed).await;
        Ok(refreshed)
    }

    async fn consent(
        &self,
        key: &str,
        scopes: &ScopeSet,
        identity: &str,
    ) -> CredentialResult<CredentialRecord> {
        let client = self.client_identity().await?;

        info!(scopes = %scopes, "Starting interactive consent");
        let record = self
            .flow
            .run_interactive_consent(client, scopes, identity)
            .await
            .map_err(|e| {
                error!(error = %e, "Interactive consent failed");
                into_authentication_failure(e)
            })?;

        if !record.scopes.contains_all(scopes) {
            let missing = record.scopes.missing_from(scopes);
            error!(missing = ?missing, "Consent did not grant all requested scopes");
            return Err(AuthorizationError::InsufficientScope { missing }.into());
        }

        self.persist(key, &record).await;
        info!("Consent completed");
        Ok(record)
    }

    async fn persist(&self, key: &str, record: &CredentialRecord) {
        self.cache
            .write()
            .await
            .insert(key.to_string(), record.clone());

        match self.store.save(key, record).await {
            Ok(()) => {
                self.revoked.write().await.remove(key);
            }
            Err(e) => {
                warn!(error = %e, "Could not persist credentials, keeping them in memory only");
            }
        }
    }

    async fn discard(&self, key: &str) {
        self.cache.write().await.remove(key);
        if let Err(e) = self.delete_stored(key).await {
            warn!(error = %e, "Could not delete stored credentials");
        }
    }

    /// Delete the stored copy. On failure the key is marked so the stale
    /// copy is never loaded again by this manager.
    async fn delete_stored(&self, key: &str) -> CredentialResult<()> {
        match self.store.delete(key).await {
            Ok(_) => {
                self.revoked.write().await.remove(key);
                Ok(())
            }
            Err(e) => {
                self.revoked.write().await.insert(key.to_string());
                Err(e)
            }
        }
    }

    async fn revoke_key(&self, key: &str, report: &mut RevocationReport) {
        let guard = self.key_guard(key).await;
        {
            let _held = guard.lock().await;
            self.revoke_key_locked(key, report).await;
        }
        self.release_guard(key, guard).await;
    }

    async fn revoke_key_locked(&self, key: &str, report: &mut RevocationReport) {
        let cached = self.cache.write().await.remove(key);
        let record = match cached {
            Some(record) => Some(record),
            None => self.store.load(key).await.unwrap_or_else(|e| {
                debug!(error = %e, "Stored entry unreadable, skipping remote revoke");
                None
            }),
        };

        if let Some(record) = &record {
            if let Err(e) = self.revoker.revoke_record(record).await {
                warn!(error = %e, "Remote revocation failed; local credentials removed anyway");
                report.warnings.push(RevocationWarning::RevocationIncomplete {
                    key: key.to_string(),
                    message: e.to_string(),
                });
            }
        }

        match self.delete_stored(key).await {
            Ok(()) => report.revoked_keys.push(key.to_string()),
            Err(e) => {
                warn!(error = %e, "Could not delete stored credentials");
                report.failures.push(RevocationFailure {
                    key: Some(key.to_string()),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Failures of the interactive flow surface as `AuthenticationFailed`.
fn into_authentication_failure(error: CredentialError) -> CredentialError {
    match error {
        CredentialError::AuthenticationFailed(_)
        | CredentialError::ConfigurationMissing(_)
        | CredentialError::InvalidRequest { .. } => error,
        other => AuthorizationError::CodeExchangeFailed {
            message: other.to_string(),
        }
        .into(),
    }
}
