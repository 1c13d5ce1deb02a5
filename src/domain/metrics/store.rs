use super::Metric;
use crate::domain::StoreError;
use crate::library::communication::implementation::redis::RedisFactory;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::VecDeque;
use tokio::sync::Mutex;

const METRICS_KEY: &str = "courier:metrics";

/// Append-only log of [`Metrics`](Metric), capped to the most recent entries
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Appends entries, evicting the oldest ones beyond the cap
    async fn append(&self, metrics: &[Metric]) -> Result<(), StoreError>;

    /// Every retained entry in insertion order
    async fn all(&self) -> Result<Vec<Metric>, StoreError>;
}

/// Volatile [`MetricStore`]
pub struct MemoryMetricStore {
    limit: usize,
    metrics: Mutex<VecDeque<Metric>>,
}

impl MemoryMetricStore {
    /// Creates a store retaining at most `limit` entries
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            metrics: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn append(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        let mut stored = self.metrics.lock().await;
        stored.extend(metrics.iter().cloned());

        while stored.len() > self.limit {
            stored.pop_front();
        }

        Ok(())
    }

    async fn all(&self) -> Result<Vec<Metric>, StoreError> {
        Ok(self.metrics.lock().await.iter().cloned().collect())
    }
}

/// [`MetricStore`] keeping JSON encoded entries in a capped Redis list
pub struct RedisMetricStore {
    factory: RedisFactory,
    limit: usize,
}

impl RedisMetricStore {
    /// Creates a store retaining at most `limit` entries
    pub fn new(factory: RedisFactory, limit: usize) -> Self {
        Self { factory, limit }
    }
}

#[async_trait]
impl MetricStore for RedisMetricStore {
    async fn append(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        if metrics.is_empty() {
            return Ok(());
        }

        let encoded = metrics
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<String>, _>>()?;

        let mut con = self.factory.shared();
        redis::pipe()
            .atomic()
            .rpush(METRICS_KEY, encoded)
            .ignore()
            .ltrim(METRICS_KEY, -(self.limit as isize), -1)
            .ignore()
            .query_async::<_, ()>(&mut con)
            .await?;

        Ok(())
    }

    async fn all(&self) -> Result<Vec<Metric>, StoreError> {
        let mut con = self.factory.shared();
        let encoded: Vec<String> = con.lrange(METRICS_KEY, 0, -1).await?;

        Ok(encoded
            .iter()
            .map(|entry| serde_json::from_str(entry))
            .collect::<Result<Vec<Metric>, _>>()?)
    }
}
