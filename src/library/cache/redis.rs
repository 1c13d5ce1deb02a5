use super::{Cache, CacheError, CacheKey};
use crate::library::communication::implementation::redis::RedisFactory;
use async_trait::async_trait;
use redis::{AsyncCommands, RedisError};
use std::time::Duration;

const KEY_PREFIX: &str = "courier:cache";

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Cache shared by all processes connected to the same Redis server
pub struct RedisCache {
    factory: RedisFactory,
    default_ttl: Duration,
}

impl RedisCache {
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: RedisFactory, default_ttl: Duration) -> Self {
        Self {
            factory,
            default_ttl,
        }
    }

    fn key(key: &CacheKey) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_raw(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut con = self.factory.shared();
        Ok(con.get(Self::key(key)).await?)
    }

    async fn set_raw(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut con = self.factory.shared();
        let millis = ttl.as_millis().clamp(1, usize::MAX as u128) as usize;
        let _: () = con.pset_ex(Self::key(key), value, millis).await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut con = self.factory.shared();
        let _: () = con.del(Self::key(key)).await?;
        Ok(())
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
