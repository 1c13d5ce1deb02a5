use super::{join_url, Trigger, ValidationError, QUEUE_SIZE_EVENTS};
use crate::library::communication::event::{
    Notification, Priority, PublishOptions, QueueClass, QueueDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

const INTERNAL_QUEUE_KEY: &str = "event.internal";
const EXTERNAL_QUEUE_KEY: &str = "event.external";

/// Producer supplied context of an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Producing service
    #[serde(default)]
    pub source: String,
    /// Schema version of the data
    #[serde(default)]
    pub version: String,
    /// Environment the event was produced in
    #[serde(default)]
    pub environment: String,
    /// Headers to send with every delivery, taking precedence over trigger headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Producer supplied delivery options, durations in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadOptions {
    /// Retry budget of the dispatch step
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Retention of the completed dispatch
    #[serde(default)]
    pub retention: Option<u64>,
    /// Processing deadline of the dispatch step
    #[serde(default)]
    pub deadline: Option<u64>,
    /// Window in which identical publishes are rejected
    #[serde(default)]
    pub unique_ttl: Option<u64>,
    /// Delay before the event is dispatched
    #[serde(default)]
    pub schedule_in: Option<u64>,
    /// Priority lane
    #[serde(default)]
    pub queue: Option<String>,
    /// Backend class tag
    #[serde(default)]
    pub class: Option<String>,
}

impl PayloadOptions {
    /// Resolves the tags into typed [`PublishOptions`], rejecting unknown classes and priorities
    pub fn publish_options(&self, default_class: QueueClass) -> Result<PublishOptions, ValidationError> {
        let class = match &self.class {
            Some(tag) if !tag.trim().is_empty() => tag.parse()?,
            _ => default_class,
        };

        let priority = match &self.queue {
            Some(name) => name.parse()?,
            None => Priority::default(),
        };

        Ok(PublishOptions {
            attributes: HashMap::new(),
            max_retries: self.max_retries,
            retention: self.retention.map(Duration::from_secs),
            deadline: self.deadline.map(Duration::from_secs),
            unique_ttl: self.unique_ttl.map(Duration::from_secs),
            schedule_in: self.schedule_in.map(Duration::from_secs),
            priority,
            class,
        })
    }
}

/// Event published by a producer, awaiting expansion into deliveries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalPayload {
    /// Name of the registered event
    pub event_name: String,
    /// Arbitrary event data
    #[serde(default)]
    pub data: Option<Value>,
    /// Producer context
    #[serde(default)]
    pub metadata: Metadata,
    /// Delivery options
    #[serde(default)]
    pub opts: PayloadOptions,
}

impl InternalPayload {
    /// Rejects payloads that can never be dispatched
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_name.trim().is_empty() {
            return Err(ValidationError::EmptyEventName);
        }

        match &self.data {
            None | Some(Value::Null) => Err(ValidationError::MissingData),
            Some(_) => Ok(()),
        }
    }
}

impl Notification for InternalPayload {
    fn queue() -> QueueDescriptor {
        QueueDescriptor::new(INTERNAL_QUEUE_KEY.into(), QUEUE_SIZE_EVENTS)
    }
}

/// Single delivery of an event to one trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Name of the event
    pub event_name: String,
    /// Destination
    pub trigger: Trigger,
    /// Body of the webhook call
    pub data: Value,
    /// Effective headers, already merged
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RequestPayload {
    /// Builds the delivery, merging payload headers over trigger headers
    pub fn new(
        event_name: String,
        trigger: Trigger,
        data: Value,
        payload_headers: &HashMap<String, String>,
    ) -> Self {
        let headers = merge_headers(&trigger.headers, payload_headers);

        Self {
            event_name,
            trigger,
            data,
            headers,
        }
    }

    /// Absolute destination url
    pub fn url(&self) -> String {
        join_url(&self.trigger.base_url, &self.trigger.path)
    }
}

impl Notification for RequestPayload {
    fn queue() -> QueueDescriptor {
        QueueDescriptor::new(EXTERNAL_QUEUE_KEY.into(), QUEUE_SIZE_EVENTS)
    }
}

/// Union of both header sets where `payload` wins on conflicts
pub fn merge_headers(
    trigger: &HashMap<String, String>,
    payload: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = trigger.clone();
    merged.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
