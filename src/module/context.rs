use super::options::{BrokerConfig, PubSubClientKind};
use crate::domain::metrics::{MemoryMetricStore, MetricStore, MetricsRecorder, RedisMetricStore};
use crate::domain::registry::{EventRegistry, EventResolver};
use crate::domain::store::{EventStore, MemoryEventStore, MongoEventStore};
use crate::domain::{ConfigError, StoreError};
use crate::harness::BrokerPublisher;
use crate::library::cache::{Cache, MemoryCache, RedisCache};
use crate::library::communication::event::{
    DeadLetter, Notification, ObservedPublisher, QueueClass,
};
use crate::library::communication::implementation::pubsub::{
    MemoryPubSubClient, PubSubClient, PubSubQueue, PubSubSettings,
};
use crate::library::communication::implementation::redis::{
    RedisFactory, RedisPubSubClient, TaskQueue, TaskQueueSettings,
};
use crate::library::communication::QueueStrategy;
use crate::library::BoxedError;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state of a broker process, built once from the [`BrokerConfig`]
#[derive(Clone)]
pub struct BrokerContext {
    /// Validated configuration
    pub config: BrokerConfig,
    /// Snapshot store of definitions and archived events
    pub registry: Arc<EventRegistry>,
    /// Durable store
    pub store: Arc<dyn EventStore>,
    /// Definition cache
    pub cache: Arc<dyn Cache>,
    /// Registry, cache and store lookup chain
    pub resolver: EventResolver,
    /// Queue backends
    pub strategy: QueueStrategy,
    /// Persisted measurements
    pub metrics: Arc<dyn MetricStore>,
    /// Collector of publish and consume measurements
    pub recorder: MetricsRecorder,
    /// Publisher reporting to the recorder
    pub publisher: BrokerPublisher,
}

impl BrokerContext {
    /// Connects to every configured backend
    pub async fn connect(config: BrokerConfig) -> Result<Self, BoxedError> {
        let factory = match &config.redis_url {
            Some(url) => {
                info!(url = url.as_str(), "Connecting to redis");
                Some(RedisFactory::connect(url).await?)
            }
            None => None,
        };

        let store: Arc<dyn EventStore> = match &config.mongodb_url {
            Some(url) => Arc::new(MongoEventStore::connect(url, &config.database).await?),
            None => {
                warn!("No MongoDB configured, event definitions are kept in memory");
                Arc::new(MemoryEventStore::new())
            }
        };

        let (cache, metrics): (Arc<dyn Cache>, Arc<dyn MetricStore>) = match &factory {
            Some(factory) => (
                Arc::new(RedisCache::new(factory.clone(), config.cache_ttl)),
                Arc::new(RedisMetricStore::new(factory.clone(), config.metrics_limit)),
            ),
            None => (
                Arc::new(MemoryCache::new(config.cache_size, config.cache_ttl)),
                Arc::new(MemoryMetricStore::new(config.metrics_limit)),
            ),
        };

        let pubsub_client: Option<Arc<dyn PubSubClient>> = match (config.pubsub_client, &factory) {
            (PubSubClientKind::Redis, Some(factory)) => Some(Arc::new(RedisPubSubClient::new(
                factory.clone(),
                config.stream_limit,
            ))),
            (PubSubClientKind::Memory, _) => Some(Arc::new(MemoryPubSubClient::new())),
            (PubSubClientKind::Redis, None) => None,
        };

        let strategy = build_strategy(&config, factory, pubsub_client)?;

        Ok(Self::assemble(config, store, cache, metrics, strategy))
    }

    /// Context where every collaborator lives in this process
    pub fn in_memory(config: BrokerConfig) -> Result<Self, ConfigError> {
        let client: Arc<dyn PubSubClient> = Arc::new(MemoryPubSubClient::new());
        let strategy = build_strategy(&config, None, Some(client))?;

        Ok(Self::assemble(
            config.clone(),
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryCache::new(config.cache_size, config.cache_ttl)),
            Arc::new(MemoryMetricStore::new(config.metrics_limit)),
            strategy,
        ))
    }

    /// Loads the initial registry snapshots from the store
    pub async fn load(&self) -> Result<(), StoreError> {
        let events = self.store.fetch_all().await?;
        let archived = self.store.fetch_all_archived().await?;

        let generation = self.registry.refresh(events);
        self.registry.refresh_archived(archived);

        info!(
            generation,
            events = self.registry.snapshot().len(),
            archived = self.registry.archived_snapshot().len(),
            "Loaded event registry"
        );

        Ok(())
    }

    fn assemble(
        config: BrokerConfig,
        store: Arc<dyn EventStore>,
        cache: Arc<dyn Cache>,
        metrics: Arc<dyn MetricStore>,
        strategy: QueueStrategy,
    ) -> Self {
        let registry = Arc::new(EventRegistry::new());
        let resolver = EventResolver::new(
            registry.clone(),
            cache.clone(),
            store.clone(),
            config.cache_ttl,
        );
        let recorder = MetricsRecorder::new(metrics.clone());
        let publisher = ObservedPublisher::new(strategy.clone(), Arc::new(recorder.clone()));

        Self {
            config,
            registry,
            store,
            cache,
            resolver,
            strategy,
            metrics,
            recorder,
            publisher,
        }
    }
}

fn build_strategy(
    config: &BrokerConfig,
    factory: Option<RedisFactory>,
    pubsub_client: Option<Arc<dyn PubSubClient>>,
) -> Result<QueueStrategy, ConfigError> {
    let mut strategy = QueueStrategy::new();

    for class in config.backends.iter() {
        match class {
            QueueClass::TaskQueue => {
                let factory = factory
                    .clone()
                    .ok_or(ConfigError::MissingRedis("the task queue backend"))?;

                let settings = TaskQueueSettings {
                    default_max_retries: config.max_retries,
                    lease: config.task_lease,
                    archive_limit: config.archive_limit,
                    dead_letter_queue: Some(DeadLetter::queue()),
                    ..Default::default()
                };

                strategy = strategy.with_task_queue(TaskQueue::new(factory, settings));
            }
            QueueClass::PubSub => {
                let client = pubsub_client
                    .clone()
                    .ok_or(ConfigError::MissingRedis("the redis pub/sub client"))?;

                let settings = PubSubSettings {
                    max_outstanding_messages: config.max_outstanding_messages,
                    max_outstanding_bytes: config.max_outstanding_bytes,
                    ack_deadline: config.ack_deadline,
                    retry: config.retry.clone(),
                    max_retries: config.max_retries,
                    dead_letter_queue: Some(DeadLetter::queue()),
                    ..Default::default()
                };

                strategy = strategy.with_pubsub(PubSubQueue::new(client, settings));
            }
        }
    }

    Ok(strategy)
}
