//! The authentication cache: secret → identity with a TTL, falling back to
//! the identity store on a miss.
//!
//! ```text
//! authenticate(secret)
//!     │
//!     ├─ cache.get ── hit ──────────────────────────→ Ok(client_id)
//!     │       │
//!     │     miss / cache error
//!     │       ▼
//!     └─ store.identify ── ok ── cache.set_with_expiry ─→ Ok(client_id)
//!                │                  (failure logged)
//!                └── err ───────────────────────────→ Err(NotFound)
//! ```
//!
//! Entries are only ever written after a successful store lookup. There is
//! no single-flight: concurrent misses for the same secret may each reach
//! the store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use edgegate_protocol::ClientId;
use tokio::time::Instant;

use crate::{AuthError, Authenticator, CacheError, IdentityStore};

const KEY_PREFIX: &str = "auth:secret:";

// ---------------------------------------------------------------------------
// KeyValueCache
// ---------------------------------------------------------------------------

/// The narrow capability the [`AuthCache`] needs from a cache backend.
pub trait KeyValueCache: Send + Sync + 'static {
    /// Returns the live value for `key`, or `None` if absent or expired.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Stores `value` under `key` until `ttl` has elapsed.
    fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// In-process [`KeyValueCache`] with per-entry deadlines.
///
/// Uses tokio's clock, so paused-time tests can expire entries with
/// `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including ones that expired but have not
    /// been swept yet.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("cache lock poisoned".into())
}

impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        match entries.get(key) {
            Some((value, deadline)) if Instant::now() < *deadline => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.retain(|_, (_, deadline)| now < *deadline);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AuthCache
// ---------------------------------------------------------------------------

/// Settings for [`AuthCache`].
#[derive(Debug, Clone)]
pub struct AuthCacheConfig {
    /// How long a resolved identity stays cached.
    ///
    /// Default: 10 minutes.
    pub ttl: Duration,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
        }
    }
}

/// Caching [`Authenticator`] over an [`IdentityStore`].
pub struct AuthCache<C, S> {
    cache: C,
    store: S,
    config: AuthCacheConfig,
}

impl<C: KeyValueCache, S: IdentityStore> AuthCache<C, S> {
    pub fn new(cache: C, store: S, config: AuthCacheConfig) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    /// Resolves `secret` to an identity, consulting the cache first.
    ///
    /// # Errors
    /// [`AuthError::MissingCredential`] for an empty secret,
    /// [`AuthError::NotFound`] when the store cannot resolve it.
    pub async fn identify(&self, secret: &str) -> Result<ClientId, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        let key = format!("{KEY_PREFIX}{secret}");
        match self.cache.get(&key).await {
            Ok(Some(id)) => return Ok(ClientId::new(id)),
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(%error, "cache read failed, treating as miss");
            }
        }

        let client_id = self.store.identify(secret).await.map_err(|error| {
            tracing::debug!(%error, "identity lookup failed");
            AuthError::NotFound
        })?;

        if let Err(error) = self
            .cache
            .set_with_expiry(&key, client_id.as_str(), self.config.ttl)
            .await
        {
            tracing::warn!(%client_id, %error, "failed to cache identity");
        }
        Ok(client_id)
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

impl<C: KeyValueCache, S: IdentityStore> Authenticator for AuthCache<C, S> {
    async fn authenticate(&self, secret: &str) -> Result<ClientId, AuthError> {
        self.identify(secret).await
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Identity store that counts lookups and knows one secret.
    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
        unavailable: bool,
    }

    impl CountingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IdentityStore for CountingStore {
        async fn identify(&self, secret: &str) -> Result<ClientId, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(AuthError::StoreUnavailable("connection refused".into()));
            }
            match secret {
                "s3cr3t" => Ok(ClientId::new("thing-A")),
                _ => Err(AuthError::NotFound),
            }
        }
    }

    /// Cache whose reads and writes always fail.
    struct BrokenCache;

    impl KeyValueCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    fn cache_with(
        store: &Arc<CountingStore>,
    ) -> AuthCache<MemoryCache, Arc<CountingStore>> {
        AuthCache::new(MemoryCache::new(), Arc::clone(store), AuthCacheConfig::default())
    }

    // =====================================================================
    // MemoryCache
    // =====================================================================

    #[tokio::test]
    async fn test_memory_cache_get_missing_returns_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("nope").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_cache_entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_with_expiry("k", "v", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_cache_set_sweeps_expired_entries() {
        let cache = MemoryCache::new();
        cache
            .set_with_expiry("old", "1", Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        cache
            .set_with_expiry("new", "2", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    // =====================================================================
    // AuthCache::identify
    // =====================================================================

    #[tokio::test]
    async fn test_identify_second_call_within_ttl_hits_cache() {
        let store = Arc::new(CountingStore::default());
        let auth = cache_with(&store);

        let first = auth.identify("s3cr3t").await.unwrap();
        let second = auth.identify("s3cr3t").await.unwrap();

        assert_eq!(first, ClientId::new("thing-A"));
        assert_eq!(first, second);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_after_ttl_consults_store_again() {
        let store = Arc::new(CountingStore::default());
        let auth = AuthCache::new(
            MemoryCache::new(),
            Arc::clone(&store),
            AuthCacheConfig {
                ttl: Duration::from_secs(10),
            },
        );

        auth.identify("s3cr3t").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        auth.identify("s3cr3t").await.unwrap();

        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_identify_unknown_secret_returns_not_found_and_caches_nothing() {
        let store = Arc::new(CountingStore::default());
        let auth = cache_with(&store);

        let result = auth.identify("wrong").await;

        assert!(matches!(result, Err(AuthError::NotFound)));
        assert!(auth.cache().is_empty());
    }

    #[tokio::test]
    async fn test_identify_store_unavailable_returns_not_found() {
        let store = Arc::new(CountingStore {
            unavailable: true,
            ..Default::default()
        });
        let auth = cache_with(&store);

        let result = auth.identify("s3cr3t").await;

        assert!(matches!(result, Err(AuthError::NotFound)));
        assert!(auth.cache().is_empty());
    }

    #[tokio::test]
    async fn test_identify_empty_secret_skips_store() {
        let store = Arc::new(CountingStore::default());
        let auth = cache_with(&store);

        let result = auth.identify("").await;

        assert!(matches!(result, Err(AuthError::MissingCredential)));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_identify_broken_cache_falls_back_to_store() {
        let store = Arc::new(CountingStore::default());
        let auth =
            AuthCache::new(BrokenCache, Arc::clone(&store), AuthCacheConfig::default());

        // Read and write both fail; the identity is still returned.
        assert_eq!(auth.identify("s3cr3t").await.unwrap(), ClientId::new("thing-A"));
        assert_eq!(auth.identify("s3cr3t").await.unwrap(), ClientId::new("thing-A"));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_identify_concurrent_callers_agree() {
        let store = Arc::new(CountingStore::default());
        let auth = Arc::new(cache_with(&store));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let auth = Arc::clone(&auth);
            handles.push(tokio::spawn(async move { auth.identify("s3cr3t").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), ClientId::new("thing-A"));
        }
        let calls = store.calls();
        assert!((1..=16).contains(&calls), "store calls: {calls}");
    }

    #[tokio::test]
    async fn test_authenticate_delegates_to_identify() {
        let store = Arc::new(CountingStore::default());
        let auth = cache_with(&store);
        let id = Authenticator::authenticate(&auth, "s3cr3t").await.unwrap();
        assert_eq!(id.as_str(), "thing-A");
    }
}
