use super::{Cache, CacheError, CacheKey};
use async_trait::async_trait;
use lru::LruCache;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process local cache evicting the least recently used entry once full
pub struct MemoryCache {
    entries: Mutex<LruCache<CacheKey, (Instant, Vec<u8>)>>,
    default_ttl: Duration,
}

impl MemoryCache {
    /// Creates a cache holding at most `capacity` entries
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity.max(1))),
            default_ttl,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<CacheKey, (Instant, Vec<u8>)>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("memory cache is poisoned".into()))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_raw(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.lock()?;

        let expired = match entries.get(key) {
            Some((expiry, value)) if *expiry > Instant::now() => return Ok(Some(value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }

        Ok(None)
    }

    async fn set_raw(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.lock()?.put(key.clone(), (Instant::now() + ttl, value));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.lock()?.pop(key);
        Ok(())
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
