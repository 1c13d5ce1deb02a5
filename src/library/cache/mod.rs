//! Key/value caching with time based expiry
//!
//! The [`Cache`] trait only deals with raw bytes; [`CacheExt`] layers JSON (de)serialization and
//! the usual read-through helpers on top of it.

mod memory;
mod redis;

pub use self::redis::*;
pub use memory::*;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`Cache`] implementations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Storage backend failed
    #[error("cache backend failed: {0}")]
    Backend(String),
    /// Value could not be (de)serialized
    #[error("cached value could not be (de)serialized")]
    Serialization(#[from] serde_json::Error),
}

/// Namespaced cache key built from multiple parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Joins the parts with `:`
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = parts.into_iter().map(|p| p.as_ref().to_owned()).collect();
        Self(parts.join(":"))
    }

    /// Joined representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte oriented key/value store with per entry expiry
#[async_trait]
pub trait Cache: Send + Sync {
    /// Reads an entry, `None` if it is missing or expired
    async fn get_raw(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Writes an entry which expires after `ttl`
    async fn set_raw(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes an entry
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Expiry used when callers have no better idea
    fn default_ttl(&self) -> Duration;
}

/// Typed helpers for every [`Cache`]
#[async_trait]
pub trait CacheExt {
    /// Reads and deserializes an entry
    async fn get<T>(&self, key: &CacheKey) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Send;

    /// Serializes and writes an entry
    async fn set<T>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + Sync;

    /// Always computes the value and writes it to the cache, replacing whatever was there
    async fn hydrate<T, E, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + Send + Sync,
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send;

    /// Returns the cached value or computes, caches and returns it on a miss.
    /// Errors of the computation are returned as-is and never cached.
    async fn once<T, E, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send;
}

#[async_trait]
impl<C> CacheExt for C
where
    C: Cache + ?Sized,
{
    async fn get<T>(&self, key: &CacheKey) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set<T>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set_raw(key, bytes, ttl).await
    }

    async fn hydrate<T, E, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + Send + Sync,
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let value = compute().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    async fn once<T, E, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        self.hydrate(key, ttl, compute).await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn join_key_parts() {
        assert_eq!(CacheKey::new(["event", "order.created"]).as_str(), "event:order.created");
        assert_eq!(CacheKey::new(vec![String::from("single")]).to_string(), "single");
    }

    #[tokio::test]
    async fn compute_once_per_key() {
        let cache = MemoryCache::new(16, Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let key = CacheKey::new(["answer"]);

        for _ in 0..3 {
            let value: Result<u32, CacheError> = cache
                .once(&key, cache.default_ttl(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(value.unwrap(), 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_cache_failed_computations() {
        let cache = MemoryCache::new(16, Duration::from_secs(60));
        let key = CacheKey::new(["answer"]);

        let failed: Result<u32, CacheError> = cache
            .once(&key, cache.default_ttl(), || async {
                Err(CacheError::Backend("store down".into()))
            })
            .await;
        assert!(failed.is_err());

        let cached: Option<u32> = cache.get(&key).await.unwrap();
        assert_eq!(cached, None);
    }

    #[tokio::test]
    async fn replace_on_hydrate() {
        let cache = MemoryCache::new(16, Duration::from_secs(60));
        let key = CacheKey::new(["answer"]);

        cache.set(&key, &1u32, cache.default_ttl()).await.unwrap();
        let value: Result<u32, CacheError> = cache
            .hydrate(&key, cache.default_ttl(), || async { Ok(2) })
            .await;

        assert_eq!(value.unwrap(), 2);
        assert_eq!(cache.get::<u32>(&key).await.unwrap(), Some(2));
    }
}
