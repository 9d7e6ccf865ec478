//! Durable credential store with a memoized `Authorization` header.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use fixly_core::storage::{
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS, TOKEN_TYPE_KEY, USER_PROFILE_KEY,
    USER_TYPE_KEY,
};
use fixly_core::{AccessToken, Credential, DEFAULT_TOKEN_TYPE, KeyValueStorage, RefreshToken, StorageError};

/// How long a formatted header may be served before it is rebuilt.
pub const HEADER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Source of truth for the session credential.
///
/// The in-memory credential is authoritative for the lifetime of the
/// process; durable storage mirrors it on a best-effort basis. All state
/// transitions happen under a synchronous lock that is never held across an
/// `.await`, so a reader can never observe a half-applied update.
///
/// Every operation loads persisted state first. Concurrent first calls share
/// a single load.
pub struct CredentialStore {
    storage: Arc<dyn KeyValueStorage>,
    initialized: OnceCell<()>,
    state: Mutex<StoreState>,
    // Serializes writes to durable storage so the last snapshot written wins.
    persist_lock: tokio::sync::Mutex<()>,
    header_builds: AtomicU64,
}

#[derive(Default)]
struct StoreState {
    credential: Credential,
    user_type: Option<String>,
    user_profile: Option<serde_json::Value>,
    header: Option<CachedHeader>,
}

struct CachedHeader {
    value: String,
    built_at: Instant,
}

/// Outcome of [`CredentialStore::clear`].
///
/// The in-memory credential is always cleared; this only reports which
/// durable keys could not be deleted.
#[derive(Debug, Default)]
pub struct ClearReport {
    pub failures: Vec<(&'static str, StorageError)>,
}

impl ClearReport {
    /// True if every durable key was deleted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            initialized: OnceCell::new(),
            state: Mutex::new(StoreState::default()),
            persist_lock: tokio::sync::Mutex::new(()),
            header_builds: AtomicU64::new(0),
        }
    }

    /// Load the persisted credential into memory.
    ///
    /// Idempotent: only the first call reads storage, and callers that arrive
    /// while that read is in progress wait for it instead of starting their own.
    pub async fn initialize(&self) {
        self.initialized.get_or_init(|| self.load()).await;
    }

    async fn load(&self) {
        let access = self.read_key(ACCESS_TOKEN_KEY).await;
        let refresh = self.read_key(REFRESH_TOKEN_KEY).await;
        let token_type = self.read_key(TOKEN_TYPE_KEY).await;
        let user_type = self.read_key(USER_TYPE_KEY).await;
        let user_profile = self.read_key(USER_PROFILE_KEY).await.and_then(|raw| {
            serde_json::from_str(&raw)
                .inspect_err(|e| warn!(error = %e, "Ignoring unreadable cached user profile"))
                .ok()
        });

        let mut state = self.lock_state();
        state.credential = Credential {
            access_token: access.map(AccessToken::new),
            refresh_token: refresh.map(RefreshToken::new),
            token_type: token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
        };
        state.user_type = user_type;
        state.user_profile = user_profile;
        state.header = None;

        debug!(
            authenticated = state.credential.is_authenticated(),
            "Credential store initialized"
        );
    }

    async fn read_key(&self, key: &str) -> Option<String> {
        match self.storage.get(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted credential field");
                None
            }
        }
    }

    /// Current access token, if any.
    pub async fn access_token(&self) -> Option<AccessToken> {
        self.initialize().await;
        self.lock_state().credential.access_token.clone()
    }

    /// Current refresh token, if any.
    pub async fn refresh_token(&self) -> Option<RefreshToken> {
        self.initialize().await;
        self.lock_state().credential.refresh_token.clone()
    }

    /// Current token type (`Bearer` unless the server said otherwise).
    pub async fn token_type(&self) -> String {
        self.initialize().await;
        self.lock_state().credential.token_type.clone()
    }

    /// Copy of the whole credential.
    pub async fn snapshot(&self) -> Credential {
        self.initialize().await;
        self.lock_state().credential.clone()
    }

    /// True iff an access token is present. Expiry is never inspected.
    pub async fn has_valid_tokens(&self) -> bool {
        self.initialize().await;
        self.lock_state().credential.is_authenticated()
    }

    /// The `Authorization` header value, or `None` when unauthenticated.
    ///
    /// The formatted value is memoized for [`HEADER_CACHE_TTL`] and dropped
    /// whenever the credential changes.
    pub async fn auth_header(&self) -> Option<String> {
        self.initialize().await;

        let mut state = self.lock_state();
        state.credential.access_token.as_ref()?;

        if let Some(cached) = &state.header
            && cached.built_at.elapsed() < HEADER_CACHE_TTL
        {
            return Some(cached.value.clone());
        }

        let value = state.credential.authorization()?;
        self.header_builds.fetch_add(1, Ordering::Relaxed);
        state.header = Some(CachedHeader {
            value: value.clone(),
            built_at: Instant::now(),
        });
        Some(value)
    }

    /// Replace the credential.
    ///
    /// The access token is always replaced (`None` or empty logs the session
    /// out). The refresh token is replaced only when a non-empty value is
    /// given. A missing token type falls back to `Bearer`.
    ///
    /// # Errors
    ///
    /// Returns the first [`StorageError`] hit while persisting. The in-memory
    /// credential is updated regardless.
    #[instrument(skip_all)]
    pub async fn set_tokens(
        &self,
        access: Option<&str>,
        refresh: Option<&str>,
        token_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.initialize().await;

        {
            let mut state = self.lock_state();
            state.credential.access_token = access.filter(|t| !t.is_empty()).map(AccessToken::new);
            if let Some(refresh) = refresh.filter(|t| !t.is_empty()) {
                state.credential.refresh_token = Some(RefreshToken::new(refresh));
            }
            state.credential.token_type = token_type
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_TOKEN_TYPE)
                .to_string();
            state.header = None;

            debug!(
                authenticated = state.credential.is_authenticated(),
                has_refresh = state.credential.refresh_token.is_some(),
                "Credential replaced"
            );
        }

        self.persist_credential().await
    }

    /// Erase the credential, role marker and cached profile.
    ///
    /// Never fails: the in-memory state is cleared first, then each durable
    /// key is deleted independently and failures are collected in the report.
    #[instrument(skip_all)]
    pub async fn clear(&self) -> ClearReport {
        self.initialize().await;

        {
            let mut state = self.lock_state();
            state.credential = Credential::empty();
            state.user_type = None;
            state.user_profile = None;
            state.header = None;
        }

        let _guard = self.persist_lock.lock().await;
        let mut report = ClearReport::default();
        for key in SESSION_KEYS {
            if let Err(e) = self.storage.delete(key).await {
                warn!(key, error = %e, "Failed to delete persisted session field");
                report.failures.push((key, e));
            }
        }

        info!(complete = report.is_complete(), "Credentials cleared");
        report
    }

    /// Account role marker (customer, provider, ...).
    pub async fn user_type(&self) -> Option<String> {
        self.initialize().await;
        self.lock_state().user_type.clone()
    }

    /// Replace the role marker. `None` removes it.
    pub async fn set_user_type(&self, user_type: Option<&str>) -> Result<(), StorageError> {
        self.initialize().await;
        let user_type = user_type.filter(|t| !t.is_empty()).map(str::to_string);
        self.lock_state().user_type = user_type.clone();

        let _guard = self.persist_lock.lock().await;
        self.write_field(USER_TYPE_KEY, user_type.as_deref()).await
    }

    /// Cached user-profile projection.
    pub async fn user_profile(&self) -> Option<serde_json::Value> {
        self.initialize().await;
        self.lock_state().user_profile.clone()
    }

    /// Replace the cached profile. `None` removes it.
    pub async fn set_user_profile(
        &self,
        profile: Option<&serde_json::Value>,
    ) -> Result<(), StorageError> {
        self.initialize().await;
        self.lock_state().user_profile = profile.cloned();

        let encoded = profile.map(serde_json::to_string).transpose()?;
        let _guard = self.persist_lock.lock().await;
        self.write_field(USER_PROFILE_KEY, encoded.as_deref()).await
    }

    async fn persist_credential(&self) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;

        // Snapshot after taking the lock so the latest credential is what lands on disk.
        let credential = self.lock_state().credential.clone();

        let results = [
            self.write_field(
                ACCESS_TOKEN_KEY,
                credential.access_token.as_ref().map(AccessToken::as_str),
            )
            .await,
            self.write_field(
                REFRESH_TOKEN_KEY,
                credential.refresh_token.as_ref().map(RefreshToken::as_str),
            )
            .await,
            // A token type without an access token would outlive a clear().
            self.write_field(
                TOKEN_TYPE_KEY,
                credential
                    .access_token
                    .as_ref()
                    .map(|_| credential.token_type.as_str()),
            )
            .await,
        ];

        results.into_iter().collect()
    }

    async fn write_field(&self, key: &'static str, value: Option<&str>) -> Result<(), StorageError> {
        let result = match value {
            Some(value) => self.storage.set(key, value).await,
            None => self.storage.delete(key).await,
        };
        if let Err(ref e) = result {
            warn!(key, error = %e, "Failed to persist credential field");
        }
        result
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn header_builds(&self) -> u64 {
        self.header_builds.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("initialized", &self.initialized.initialized())
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use fixly_core::MemoryStorage;
    use futures_util::future::join_all;

    use super::*;

    /// Storage that counts reads and pauses on each one.
    #[derive(Default)]
    struct SlowStorage {
        inner: MemoryStorage,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStorage for SlowStorage {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.inner.delete(key).await
        }
    }

    /// Storage whose writes and deletes always fail.
    #[derive(Default)]
    struct BrokenStorage;

    #[async_trait]
    impl KeyValueStorage for BrokenStorage {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend {
                message: "disk full".to_string(),
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend {
                message: "read-only".to_string(),
            })
        }
    }

    fn memory_store() -> (Arc<MemoryStorage>, CredentialStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = CredentialStore::new(storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn loads_persisted_credential() {
        let storage = Arc::new(MemoryStorage::with_entries([
            (ACCESS_TOKEN_KEY, "A1"),
            (REFRESH_TOKEN_KEY, "R1"),
            (USER_TYPE_KEY, "provider"),
            (USER_PROFILE_KEY, r#"{"name":"Ada"}"#),
        ]));
        let store = CredentialStore::new(storage);

        assert_eq!(store.access_token().await.unwrap().as_str(), "A1");
        assert_eq!(store.refresh_token().await.unwrap().as_str(), "R1");
        assert_eq!(store.token_type().await, "Bearer");
        assert_eq!(store.user_type().await.as_deref(), Some("provider"));
        assert_eq!(store.user_profile().await.unwrap()["name"], "Ada");
        assert_eq!(store.auth_header().await.as_deref(), Some("Bearer A1"));
    }

    #[tokio::test]
    async fn concurrent_initialization_reads_storage_once() {
        let storage = Arc::new(SlowStorage::default());
        storage.inner.set(ACCESS_TOKEN_KEY, "A1").await.unwrap();
        let store = CredentialStore::new(storage.clone());

        let results = join_all((0..8).map(|_| store.has_valid_tokens())).await;
        assert!(results.into_iter().all(|authenticated| authenticated));

        store.initialize().await;
        assert_eq!(storage.reads.load(Ordering::SeqCst), SESSION_KEYS.len());
    }

    #[tokio::test]
    async fn auth_header_is_none_without_access_token() {
        let (_, store) = memory_store();
        assert_eq!(store.auth_header().await, None);

        store.set_tokens(None, Some("R1"), None).await.unwrap();
        assert_eq!(store.auth_header().await, None);
        assert!(!store.has_valid_tokens().await);
    }

    #[tokio::test]
    async fn persist_after_clear_leaves_storage_empty() {
        let (storage, store) = memory_store();
        store.set_tokens(Some("A1"), Some("R1"), Some("Bearer")).await.unwrap();

        // A set_tokens whose write was queued behind clear() lands afterwards.
        store.clear().await;
        store.persist_credential().await.unwrap();

        for key in SESSION_KEYS {
            assert!(!storage.contains(key), "{} survived clear", key);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auth_header_is_memoized_within_window() {
        let (_, store) = memory_store();
        store.set_tokens(Some("A1"), Some("R1"), None).await.unwrap();

        let first = store.auth_header().await;
        tokio::time::advance(HEADER_CACHE_TTL - Duration::from_secs(1)).await;
        let second = store.auth_header().await;

        assert_eq!(first.as_deref(), Some("Bearer A1"));
        assert_eq!(first, second);
        assert_eq!(store.header_builds(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.auth_header().await.as_deref(), Some("Bearer A1"));
        assert_eq!(store.header_builds(), 2);
    }

    #[tokio::test]
    async fn header_reflects_most_recent_update() {
        let (_, store) = memory_store();

        store.set_tokens(Some("A1"), Some("R1"), None).await.unwrap();
        assert_eq!(store.auth_header().await.as_deref(), Some("Bearer A1"));

        store.set_tokens(Some("A2"), None, Some("Token")).await.unwrap();
        assert_eq!(store.auth_header().await.as_deref(), Some("Token A2"));

        store.clear().await;
        assert_eq!(store.auth_header().await, None);

        store.set_tokens(Some("A3"), None, None).await.unwrap();
        assert_eq!(store.auth_header().await.as_deref(), Some("Bearer A3"));

        // Explicit logout is visible immediately, not after the window expires.
        store.set_tokens(None, None, None).await.unwrap();
        assert_eq!(store.auth_header().await, None);
    }

    #[tokio::test]
    async fn refresh_token_is_retained_when_not_supplied() {
        let (storage, store) = memory_store();
        store.set_tokens(Some("A1"), Some("R1"), None).await.unwrap();
        store.set_tokens(Some("A2"), None, Some("Bearer")).await.unwrap();

        assert_eq!(store.access_token().await.unwrap().as_str(), "A2");
        assert_eq!(store.refresh_token().await.unwrap().as_str(), "R1");
        assert_eq!(
            storage.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("R1")
        );
    }

    #[tokio::test]
    async fn absent_fields_are_deleted_not_blanked() {
        let (storage, store) = memory_store();
        store.set_tokens(Some("A1"), Some("R1"), None).await.unwrap();
        store.set_tokens(Some(""), None, None).await.unwrap();

        assert!(!storage.contains(ACCESS_TOKEN_KEY));
        assert!(storage.contains(REFRESH_TOKEN_KEY));
        assert!(!storage.contains(TOKEN_TYPE_KEY));
    }

    #[tokio::test]
    async fn storage_failure_still_updates_memory() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));

        let result = store.set_tokens(Some("A1"), Some("R1"), None).await;
        assert!(matches!(result, Err(StorageError::Backend { .. })));
        assert_eq!(store.auth_header().await.as_deref(), Some("Bearer A1"));
    }

    #[tokio::test]
    async fn clear_is_best_effort_and_idempotent() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));
        let _ = store.set_tokens(Some("A1"), Some("R1"), None).await;

        let report = store.clear().await;
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), SESSION_KEYS.len());
        assert!(!store.has_valid_tokens().await);
        assert!(store.refresh_token().await.is_none());

        store.clear().await;
        assert!(!store.has_valid_tokens().await);
    }

    #[tokio::test]
    async fn clear_removes_profile_and_role() {
        let (storage, store) = memory_store();
        store.set_tokens(Some("A1"), Some("R1"), None).await.unwrap();
        store.set_user_type(Some("customer")).await.unwrap();
        store
            .set_user_profile(Some(&serde_json::json!({"id": 7})))
            .await
            .unwrap();

        let report = store.clear().await;
        assert!(report.is_complete());
        for key in SESSION_KEYS {
            assert!(!storage.contains(key), "{key} should be deleted");
        }
        assert_eq!(store.user_type().await, None);
        assert_eq!(store.user_profile().await, None);
    }

    #[test]
    fn debug_output_is_redacted() {
        let (_, store) = memory_store();
        let debug = format!("{:?}", store);
        assert!(debug.contains("[REDACTED]"));
    }
}
