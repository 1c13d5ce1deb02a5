//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use crate::domain::ConfigError;
use crate::library::communication::event::{QueueClass, RetryPolicy};
use crate::library::helpers::parse_seconds;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use thiserror::Error;

/// Options for connecting to the Redis server
#[derive(Debug, Clone, StructOpt)]
pub struct RedisOptions {
    /// Redis database server URL, required by the task queue and the Redis pub/sub client.
    /// Without it caches and metrics are kept in memory.
    #[structopt(short = "r", long = "redis", env = "REDIS", value_name = "url")]
    pub url: Option<String>,
}

/// Options relevant for message queueing
#[derive(Debug, Clone, StructOpt)]
pub struct QueueingOptions {
    /// Unique and stable identifier for this instance.
    /// It is used to identify and resume work after a crash
    /// or deliberate restart, thus it may not change across
    /// executions!
    #[structopt(long, env, default_value = "courier")]
    pub id: String,
}

/// Options regarding the durable event store
#[derive(Debug, Clone, StructOpt)]
pub struct MongoDBOptions {
    /// MongoDB connection URL, events are kept in memory without it
    #[structopt(long, env)]
    pub mongodb: Option<String>,

    /// Name of the database to use
    #[structopt(long, env, default_value = "courier")]
    pub database: String,
}

/// Implementation backing the pub/sub queue class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubClientKind {
    /// Redis streams
    Redis,
    /// In-process emulation, only useful when api and worker share a process
    Memory,
}

/// Unknown [`PubSubClientKind`]
#[derive(Debug, Error)]
#[error("unknown pub/sub client '{0}', expected redis or memory")]
pub struct UnknownPubSubClient(String);

impl FromStr for PubSubClientKind {
    type Err = UnknownPubSubClient;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(UnknownPubSubClient(s.to_owned())),
        }
    }
}

/// Options selecting and tuning the queue backends
#[derive(Debug, Clone, StructOpt)]
pub struct BackendOptions {
    /// Enabled queue backends
    #[structopt(long, env, default_value = "task-queue", use_delimiter = true)]
    pub backends: Vec<QueueClass>,

    /// Backend used when a publish does not name one
    #[structopt(long, env, default_value = "task-queue")]
    pub default_class: QueueClass,

    /// Implementation of the pub/sub backend (redis or memory)
    #[structopt(long, env, default_value = "redis")]
    pub pubsub_client: PubSubClientKind,

    /// Number of messages processed concurrently by each consumer
    #[structopt(long, env, default_value = "10")]
    pub concurrency: usize,

    /// Maximum number of unacknowledged pub/sub messages held by a consumer
    #[structopt(long, env, default_value = "100")]
    pub max_outstanding_messages: usize,

    /// Maximum total size in bytes of unacknowledged pub/sub messages held by a consumer
    #[structopt(long, env, default_value = "10485760")]
    pub max_outstanding_bytes: usize,

    /// Time in seconds a pub/sub message may stay unacknowledged before it is redelivered
    #[structopt(long, env, default_value = "60", parse(try_from_str = parse_seconds))]
    pub ack_deadline: Duration,

    /// Approximate number of entries retained per pub/sub stream
    #[structopt(long, env, default_value = "100000")]
    pub stream_limit: usize,

    /// Time in seconds a task may run before it is handed to another worker
    #[structopt(long, env, default_value = "1800", parse(try_from_str = parse_seconds))]
    pub task_lease: Duration,

    /// Number of archived tasks retained per topic
    #[structopt(long, env, default_value = "10000")]
    pub archive_limit: usize,
}

/// Options for the in-memory event registry
#[derive(Debug, Clone, StructOpt)]
pub struct RegistryOptions {
    /// Interval in seconds at which active events are reloaded from the store
    #[structopt(long, env, default_value = "60", parse(try_from_str = parse_seconds))]
    pub refresh_interval: Duration,

    /// Interval in seconds at which archived events are reloaded from the store
    #[structopt(long, env, default_value = "300", parse(try_from_str = parse_seconds))]
    pub archived_refresh_interval: Duration,

    /// Number of event definitions held by the in-memory cache
    #[structopt(long, env, default_value = "1000")]
    pub cache_size: usize,

    /// Time in seconds cached event definitions stay valid
    #[structopt(long, env, default_value = "300", parse(try_from_str = parse_seconds))]
    pub cache_ttl: Duration,
}

/// Options for outbound webhook calls and their retries
#[derive(Debug, Clone, StructOpt)]
pub struct DeliveryOptions {
    /// Timeout in seconds of a webhook call for triggers without their own
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub delivery_timeout: Duration,

    /// Time in seconds a fan-out waits for outstanding deliveries
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub fanout_timeout: Duration,

    /// Delay in seconds before a failed message is retried
    #[structopt(long, env, default_value = "5", parse(try_from_str = parse_seconds))]
    pub retry_backoff: Duration,

    /// Number of retries before a message is archived
    #[structopt(long, env, default_value = "5")]
    pub max_retries: u32,

    /// Number of metrics retained for the insights
    #[structopt(long, env, default_value = "100000")]
    pub metrics_limit: usize,
}

/// Options shared by every module of the broker
#[derive(Debug, Clone, StructOpt)]
pub struct BrokerOptions {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub queueing: QueueingOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub mongo: MongoDBOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub backend: BackendOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub registry: RegistryOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub delivery: DeliveryOptions,
}

/// Validated configuration, constructed once and handed to every component
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Stable identifier of this instance
    pub instance: String,
    /// Redis server, if any
    pub redis_url: Option<String>,
    /// MongoDB server, if any
    pub mongodb_url: Option<String>,
    /// MongoDB database name
    pub database: String,
    /// Enabled queue backends, deduplicated
    pub backends: Vec<QueueClass>,
    /// Backend for publishes without a class tag
    pub default_class: QueueClass,
    /// Implementation of the pub/sub backend
    pub pubsub_client: PubSubClientKind,
    /// Messages processed concurrently by each consumer
    pub concurrency: usize,
    /// Pub/sub flow control, messages
    pub max_outstanding_messages: usize,
    /// Pub/sub flow control, bytes
    pub max_outstanding_bytes: usize,
    /// Pub/sub redelivery deadline
    pub ack_deadline: Duration,
    /// Approximate pub/sub stream length
    pub stream_limit: usize,
    /// Task queue lease
    pub task_lease: Duration,
    /// Archived tasks per topic
    pub archive_limit: usize,
    /// Reload interval of active events
    pub refresh_interval: Duration,
    /// Reload interval of archived events
    pub archived_refresh_interval: Duration,
    /// Capacity of the in-memory cache
    pub cache_size: usize,
    /// Expiry of cached definitions
    pub cache_ttl: Duration,
    /// Fallback timeout of webhook calls
    pub delivery_timeout: Duration,
    /// Upper bound for a fan-out to complete
    pub fanout_timeout: Duration,
    /// Retry policy of both backends
    pub retry: RetryPolicy,
    /// Retries before a message is archived
    pub max_retries: u32,
    /// Retained metrics
    pub metrics_limit: usize,
}

fn ensure_positive<T: PartialOrd + Default>(name: &'static str, value: T) -> Result<(), ConfigError> {
    if value > T::default() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: "must be greater than zero".into(),
        })
    }
}

impl BrokerOptions {
    /// Validates the options and turns them into a [`BrokerConfig`]
    pub fn config(&self) -> Result<BrokerConfig, ConfigError> {
        let mut backends: Vec<QueueClass> = Vec::new();
        for class in self.backend.backends.iter() {
            if !backends.contains(class) {
                backends.push(*class);
            }
        }

        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        if !backends.contains(&self.backend.default_class) {
            return Err(ConfigError::ClassNotEnabled(
                self.backend.default_class.to_string(),
            ));
        }

        if self.redis.url.is_none() {
            if backends.contains(&QueueClass::TaskQueue) {
                return Err(ConfigError::MissingRedis("the task queue backend"));
            }

            if backends.contains(&QueueClass::PubSub)
                && self.backend.pubsub_client == PubSubClientKind::Redis
            {
                return Err(ConfigError::MissingRedis("the redis pub/sub client"));
            }
        }

        ensure_positive("concurrency", self.backend.concurrency)?;
        ensure_positive("max-outstanding-messages", self.backend.max_outstanding_messages)?;
        ensure_positive("max-outstanding-bytes", self.backend.max_outstanding_bytes)?;
        ensure_positive("ack-deadline", self.backend.ack_deadline)?;
        ensure_positive("refresh-interval", self.registry.refresh_interval)?;
        ensure_positive("archived-refresh-interval", self.registry.archived_refresh_interval)?;
        ensure_positive("cache-size", self.registry.cache_size)?;
        ensure_positive("delivery-timeout", self.delivery.delivery_timeout)?;
        ensure_positive("metrics-limit", self.delivery.metrics_limit)?;

        Ok(BrokerConfig {
            instance: self.queueing.id.clone(),
            redis_url: self.redis.url.clone(),
            mongodb_url: self.mongo.mongodb.clone(),
            database: self.mongo.database.clone(),
            backends,
            default_class: self.backend.default_class,
            pubsub_client: self.backend.pubsub_client,
            concurrency: self.backend.concurrency,
            max_outstanding_messages: self.backend.max_outstanding_messages,
            max_outstanding_bytes: self.backend.max_outstanding_bytes,
            ack_deadline: self.backend.ack_deadline,
            stream_limit: self.backend.stream_limit,
            task_lease: self.backend.task_lease,
            archive_limit: self.backend.archive_limit,
            refresh_interval: self.registry.refresh_interval,
            archived_refresh_interval: self.registry.archived_refresh_interval,
            cache_size: self.registry.cache_size,
            cache_ttl: self.registry.cache_ttl,
            delivery_timeout: self.delivery.delivery_timeout,
            fanout_timeout: self.delivery.fanout_timeout,
            retry: RetryPolicy::fixed(self.delivery.retry_backoff),
            max_retries: self.delivery.max_retries,
            metrics_limit: self.delivery.metrics_limit,
        })
    }
}

impl BrokerConfig {
    /// Fails when a backend only lives inside this process
    ///
    /// Processes which run only the api or only the worker exchange events through the queue
    /// backends, an in-memory pub/sub client would never see the other side.
    pub fn ensure_shared_backends(&self) -> Result<(), ConfigError> {
        if self.backends.contains(&QueueClass::PubSub)
            && self.pubsub_client == PubSubClientKind::Memory
        {
            return Err(ConfigError::ProcessLocalBackend("the memory pub/sub client"));
        }

        Ok(())
    }

    /// Single process configuration with every backend kept in memory
    pub fn in_memory() -> Self {
        Self {
            instance: "courier".into(),
            redis_url: None,
            mongodb_url: None,
            database: "courier".into(),
            backends: vec![QueueClass::PubSub],
            default_class: QueueClass::PubSub,
            pubsub_client: PubSubClientKind::Memory,
            concurrency: 10,
            max_outstanding_messages: 100,
            max_outstanding_bytes: 10 * 1024 * 1024,
            ack_deadline: Duration::from_secs(60),
            stream_limit: 100_000,
            task_lease: Duration::from_secs(30 * 60),
            archive_limit: 10_000,
            refresh_interval: Duration::from_secs(60),
            archived_refresh_interval: Duration::from_secs(300),
            cache_size: 1_000,
            cache_ttl: Duration::from_secs(300),
            delivery_timeout: Duration::from_secs(30),
            fanout_timeout: Duration::from_secs(30),
            retry: RetryPolicy::fixed(Duration::from_secs(5)),
            max_retries: 5,
            metrics_limit: 100_000,
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;

    fn options(args: &[&str]) -> BrokerOptions {
        let mut argv = vec!["courier"];
        argv.extend_from_slice(args);
        BrokerOptions::from_iter_safe(argv).unwrap()
    }

    #[test]
    fn apply_defaults() {
        let config = options(&["--redis", "redis://localhost/"]).config().unwrap();

        assert_eq!(config.backends, vec![QueueClass::TaskQueue]);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.archived_refresh_interval, Duration::from_secs(300));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.concurrency, 10);
    }

    #[test]
    fn enable_several_backends() {
        let config = options(&[
            "--redis",
            "redis://localhost/",
            "--backends",
            "task-queue,pubsub,pubsub",
            "--default-class",
            "pubsub",
        ])
        .config()
        .unwrap();

        assert_eq!(config.backends, vec![QueueClass::TaskQueue, QueueClass::PubSub]);
        assert_eq!(config.default_class, QueueClass::PubSub);
    }

    #[test]
    fn require_shared_backends_for_split_deployments() {
        let local = options(&[
            "--backends",
            "pubsub",
            "--default-class",
            "pubsub",
            "--pubsub-client",
            "memory",
        ])
        .config()
        .unwrap();

        assert_eq!(
            local.ensure_shared_backends(),
            Err(ConfigError::ProcessLocalBackend("the memory pub/sub client"))
        );

        let shared = options(&[
            "--redis",
            "redis://localhost/",
            "--backends",
            "pubsub",
            "--default-class",
            "pubsub",
        ])
        .config()
        .unwrap();

        assert_eq!(shared.ensure_shared_backends(), Ok(()));
    }

    #[test]
    fn reject_unknown_backends() {
        let argv = vec!["courier", "--backends", "carrier-pigeon"];
        assert!(BrokerOptions::from_iter_safe(argv).is_err());
    }

    #[test]
    fn reject_inconsistent_configurations() {
        assert_eq!(
            options(&[]).config(),
            Err(ConfigError::MissingRedis("the task queue backend"))
        );
        assert_eq!(
            options(&["--backends", "pubsub", "--pubsub-client", "memory"]).config(),
            Err(ConfigError::ClassNotEnabled("task-queue".into()))
        );
        assert_eq!(
            options(&[
                "--backends",
                "pubsub",
                "--default-class",
                "pubsub",
                "--pubsub-client",
                "memory",
                "--concurrency",
                "0"
            ])
            .config(),
            Err(ConfigError::InvalidValue {
                name: "concurrency",
                reason: "must be greater than zero".into()
            })
        );
    }
}
