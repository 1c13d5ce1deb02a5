use crate::library::cache::CacheError;
use crate::library::communication::event::QueueError;
use crate::library::BoxedError;
use thiserror::Error;

/// Input rejected before anything is published or stored
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Event name is empty or whitespace
    #[error("event name must not be empty")]
    EmptyEventName,
    /// Payload carries no data
    #[error("event data must not be empty")]
    MissingData,
    /// Trigger without a destination
    #[error("trigger {0} has no base url")]
    MissingBaseUrl(usize),
    /// Unknown queue class or priority
    #[error(transparent)]
    InvalidQueue(#[from] QueueError),
}

/// Event name has no definition in the registry or the store
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no event named '{0}' is registered")]
pub struct NotFoundError(pub String);

/// Failure of the persistent event store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failed
    #[error("event store backend failed")]
    Backend(#[source] BoxedError),
    /// Record could not be (de)serialized
    #[error("event store record could not be (de)serialized")]
    Serialization(#[source] BoxedError),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        StoreError::Backend(Box::new(e))
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(Box::new(e))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(Box::new(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(Box::new(e))
    }
}

/// Event could not be resolved by name
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Event is unknown
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    /// Store lookup failed
    #[error("failed to look up event")]
    Store(#[from] StoreError),
    /// Cache lookup failed
    #[error("failed to look up cached event")]
    Cache(#[from] CacheError),
}

/// Handing a notification to the queue backend failed
#[derive(Debug, Error)]
#[error("failed to publish to {topic}")]
pub struct PublishError {
    /// Topic the notification was published to
    pub topic: String,
    /// Backend error
    #[source]
    pub source: BoxedError,
}

/// Invalid process configuration, fatal at startup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No queue backend has been enabled
    #[error("at least one queue backend must be enabled")]
    NoBackends,
    /// A class is used for routing without being enabled
    #[error("queue class {0} is used but not enabled")]
    ClassNotEnabled(String),
    /// Option value out of range
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Option name
        name: &'static str,
        /// Why it is invalid
        reason: String,
    },
    /// Backend needs a Redis server but none is configured
    #[error("{0} requires a redis url")]
    MissingRedis(&'static str),
    /// Backend is confined to one process but the process only runs half of the broker
    #[error("{0} only works when api and worker run in the same process")]
    ProcessLocalBackend(&'static str),
}
