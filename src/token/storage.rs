//! Token Storage
//!
//! Persistent credential record storage keyed by [`TokenCacheKey`](crate::types::TokenCacheKey) strings.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::core::lock;
use crate::error::{CredentialError, StorageError};
use crate::types::CredentialRecord;

const RECORD_EXTENSION: &str = "json";
const TEMP_SUFFIX: &str = ".tmp";

/// Token storage interface.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the record for a key. An entry that cannot be decoded is
    /// reported as [`StorageError::CorruptedData`].
    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, CredentialError>;

    /// Store the record for a key, replacing any previous one.
    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), CredentialError>;

    /// Delete the record for a key. Returns whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, CredentialError>;

    /// List all stored keys.
    async fn list_keys(&self) -> Result<Vec<String>, CredentialError>;
}

/// One JSON file per key under a directory.
///
/// Writes go to `<key>.json.tmp` and are renamed into place, so a crash
/// never leaves a half-written record behind.
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CredentialError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            || key.starts_with('.')
        {
            return Err(CredentialError::invalid_request(format!(
                "store key is not filename-safe: {key:?}"
            )));
        }
        Ok(self.dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(TEMP_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let result = async {
            let mut file = options.open(&tmp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        let path = self.path_for(key)?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    message: format!("{}: {}", path.display(), e),
                }
                .into())
            }
        };

        serde_json::from_slice(&contents).map(Some).map_err(|e| {
            StorageError::CorruptedData {
                message: format!("{}: {}", path.display(), e),
            }
            .into()
        })
    }

    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), CredentialError> {
        let path = self.path_for(key)?;
        let contents = serde_json::to_vec_pretty(record).map_err(|e| StorageError::WriteFailed {
            message: e.to_string(),
        })?;

        self.write_atomic(&path, &contents)
            .await
            .map_err(|e| StorageError::WriteFailed {
                message: format!("{}: {}", path.display(), e),
            })?;

        debug!(path = %path.display(), "Credential record saved");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CredentialError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed {
                message: format!("{}: {}", path.display(), e),
            }
            .into()),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, CredentialError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ReadFailed {
                    message: format!("{}: {}", self.dir.display(), e),
                }
                .into())
            }
        };

        let mut keys = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| StorageError::ReadFailed {
                message: e.to_string(),
            })?;
            let Some(entry) = entry else { break };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(&format!(".{RECORD_EXTENSION}")) {
                if !key.is_empty() {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// In-memory token store. Contents are lost when the process exits.
#[derive(Default)]
pub struct InMemoryTokenStore {
    records: Mutex<HashMap<String, CredentialRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        Ok(lock(&self.records).get(key).cloned())
    }

    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), CredentialError> {
        lock(&self.records).insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CredentialError> {
        Ok(lock(&self.records).remove(key).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>, CredentialError> {
        let mut keys: Vec<String> = lock(&self.records).keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Mock token store for testing.
#[derive(Default)]
pub struct MockTokenStore {
    records: Mutex<HashMap<String, CredentialRecord>>,
    corrupted: Mutex<Vec<String>>,
    save_history: Mutex<Vec<String>>,
    load_history: Mutex<Vec<String>>,
    delete_history: Mutex<Vec<String>>,
    should_fail: Mutex<bool>,
    fail_deletes: Mutex<bool>,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation with a storage error.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *lock(&self.should_fail) = should_fail;
        self
    }

    /// Fail only deletes.
    pub fn set_fail_deletes(&self, fail: bool) -> &Self {
        *lock(&self.fail_deletes) = fail;
        self
    }

    /// Pre-populate a record.
    pub fn add_record(&self, key: &str, record: CredentialRecord) -> &Self {
        lock(&self.records).insert(key.to_string(), record);
        self
    }

    /// Make `key` present but undecodable.
    pub fn add_corrupted(&self, key: &str) -> &Self {
        lock(&self.corrupted).push(key.to_string());
        self
    }

    pub fn get_record(&self, key: &str) -> Option<CredentialRecord> {
        lock(&self.records).get(key).cloned()
    }

    pub fn get_save_history(&self) -> Vec<String> {
        lock(&self.save_history).clone()
    }

    pub fn get_load_history(&self) -> Vec<String> {
        lock(&self.load_history).clone()
    }

    pub fn get_delete_history(&self) -> Vec<String> {
        lock(&self.delete_history).clone()
    }

    fn check_error(&self) -> Result<(), CredentialError> {
        if *lock(&self.should_fail) {
            return Err(StorageError::ReadFailed {
                message: "Mock storage failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn load(&self, key: &str) -> Result<Option<CredentialRecord>, CredentialError> {
        self.check_error()?;
        lock(&self.load_history).push(key.to_string());

        if lock(&self.corrupted).iter().any(|k| k == key) {
            return Err(StorageError::CorruptedData {
                message: format!("mock corrupted entry {key}"),
            }
            .into());
        }
        Ok(lock(&self.records).get(key).cloned())
    }

    async fn save(&self, key: &str, record: &CredentialRecord) -> Result<(), CredentialError> {
        if *lock(&self.should_fail) {
            return Err(StorageError::WriteFailed {
                message: "Mock storage failure".to_string(),
            }
            .into());
        }
        lock(&self.save_history).push(key.to_string());
        lock(&self.corrupted).retain(|k| k != key);
        lock(&self.records).insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CredentialError> {
        if *lock(&self.should_fail) || *lock(&self.fail_deletes) {
            return Err(StorageError::DeleteFailed {
                message: "Mock storage failure".to_string(),
            }
            .into());
        }
        lock(&self.delete_history).push(key.to_string());

        let was_corrupted = {
            let mut corrupted = lock(&self.corrupted);
            let before = corrupted.len();
            corrupted.retain(|k| k != key);
            before != corrupted.len()
        };
        Ok(lock(&self.records).remove(key).is_some() || was_corrupted)
    }

    async fn list_keys(&self) -> Result<Vec<String>, CredentialError> {
        self.check_error()?;
        let mut keys: Vec<String> = lock(&self.records).keys().cloned().collect();
        keys.extend(lock(&self.corrupted).iter().cloned());
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScopeSet, TokenResponse};
    use chrono::Utc;

    fn create_test_record() -> CredentialRecord {
        let response = TokenResponse {
            access_token: "test-access-token".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("test-refresh-token".to_string()),
            scope: None,
            id_token: None,
            extra: HashMap::new(),
        };
        CredentialRecord::from_token_response(
            &response,
            "cid",
            &ScopeSet::new(["videos.upload"]).unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens"));
        let record = create_test_record();

        assert!(store.load("abc.def").await.unwrap().is_none());
        store.save("abc.def", &record).await.unwrap();

        let loaded = store.load("abc.def").await.unwrap().unwrap();
        assert_eq!(loaded.access_token(), "test-access-token");
        assert_eq!(loaded.expires_at, record.expires_at);
        assert_eq!(loaded.scopes, record.scopes);
        assert_eq!(store.list_keys().await.unwrap(), vec!["abc.def".to_string()]);

        assert!(store.delete("abc.def").await.unwrap());
        assert!(!store.delete("abc.def").await.unwrap());
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_ignores_temp_files_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("missing"));
        assert!(store.list_keys().await.unwrap().is_empty());

        let store = FileTokenStore::new(dir.path());
        std::fs::write(dir.path().join("abc.json.tmp"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        std::fs::write(dir.path().join("abc.json"), "{not json").unwrap();

        let err = store.load("abc").await.unwrap_err();
        assert!(matches!(
            err,
            CredentialError::Storage(StorageError::CorruptedData { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_unsafe_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(store.load(key).await.is_err(), "{key:?}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        store.save("abc", &create_test_record()).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("abc.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryTokenStore::new();
        store.save("user2", &create_test_record()).await.unwrap();
        store.save("user1", &create_test_record()).await.unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["user1", "user2"]);
        assert!(store.delete("user1").await.unwrap());
        assert!(store.load("user1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_store_history_and_failure() {
        let store = MockTokenStore::new();
        store.save("k", &create_test_record()).await.unwrap();
        assert!(store.load("k").await.unwrap().is_some());
        assert_eq!(store.get_save_history(), vec!["k".to_string()]);
        assert_eq!(store.get_load_history(), vec!["k".to_string()]);

        store.add_corrupted("bad");
        assert!(matches!(
            store.load("bad").await,
            Err(CredentialError::Storage(StorageError::CorruptedData { .. }))
        ));
        assert!(store.delete("bad").await.unwrap());

        store.set_should_fail(true);
        assert!(store.load("k").await.is_err());
        assert!(store.save("k", &create_test_record()).await.is_err());
    }
}
