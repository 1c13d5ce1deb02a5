use super::ValidationError;
use crate::library::communication::event::{PublishOptions, QueueClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Attribute carrying the destination of a delivery
pub const TRIGGER_ATTRIBUTE: &str = "courier-trigger";
/// Attribute carrying the delivery type of a delivery
pub const DELIVERY_TYPE_ATTRIBUTE: &str = "courier-delivery-type";

/// Upper bound for the retry budget of [`DeliveryType::NotPersistent`] triggers
const NOT_PERSISTENT_MAX_RETRIES: u32 = 3;

/// Whether an event is produced and consumed within the platform or comes from the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Produced by platform services
    Internal,
    /// Produced by third parties
    External,
}

impl Default for EventType {
    fn default() -> Self {
        Self::Internal
    }
}

/// Lifecycle state of an event definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    /// Dispatched to its triggers
    Active,
    /// Disabled, publishes are rejected
    Inactive,
    /// Undeliverable message waiting for the sweep
    Archived,
}

impl Default for EventState {
    fn default() -> Self {
        Self::Active
    }
}

impl EventState {
    /// Lowercase name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }
}

/// How hard the broker tries to deliver to a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryType {
    /// Single attempt, no retries
    FireAndForget,
    /// Retried with the full budget and archived once it is exhausted
    Persistent,
    /// Retried a few times only
    NotPersistent,
}

impl Default for DeliveryType {
    fn default() -> Self {
        Self::Persistent
    }
}

impl DeliveryType {
    /// Kebab-case name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FireAndForget => "fire-and-forget",
            Self::Persistent => "persistent",
            Self::NotPersistent => "not-persistent",
        }
    }

    /// Number of retries granted after the first failed attempt
    pub fn retry_budget(&self, requested: Option<u32>, default: u32) -> u32 {
        match self {
            Self::FireAndForget => 0,
            Self::Persistent => requested.unwrap_or(default),
            Self::NotPersistent => requested
                .unwrap_or(default)
                .min(NOT_PERSISTENT_MAX_RETRIES),
        }
    }
}

/// Per trigger delivery tuning, durations in seconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOption {
    /// Retry budget
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Timeout of a single webhook call
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Retention of completed deliveries
    #[serde(default)]
    pub retention: Option<u64>,
    /// Window in which identical deliveries are dropped
    #[serde(default)]
    pub unique_ttl: Option<u64>,
}

/// Identity of a delivery destination, unique within an event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerIdentity {
    /// Scheme and host of the destination
    pub base_url: String,
    /// Path below the base url
    pub path: String,
}

impl TriggerIdentity {
    /// Absolute url of the destination
    pub fn url(&self) -> String {
        join_url(&self.base_url, &self.path)
    }
}

impl Display for TriggerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Joins a base url and a path with exactly one slash in between
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Destination an event is delivered to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Service owning the destination
    #[serde(default)]
    pub service_name: String,
    /// Delivery guarantees
    #[serde(rename = "type", default)]
    pub kind: DeliveryType,
    /// Scheme and host of the destination
    pub base_url: String,
    /// Path below the base url
    #[serde(default)]
    pub path: String,
    /// Headers sent with every delivery, overridden by payload headers of the same name
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Delivery tuning
    #[serde(default)]
    pub option: TriggerOption,
}

impl Trigger {
    /// Identity used to key delivery outcomes
    pub fn identity(&self) -> TriggerIdentity {
        TriggerIdentity {
            base_url: self.base_url.clone(),
            path: self.path.clone(),
        }
    }

    /// Absolute url of the destination
    pub fn url(&self) -> String {
        join_url(&self.base_url, &self.path)
    }

    /// Timeout of a single call, if configured
    pub fn timeout(&self) -> Option<Duration> {
        self.option.timeout.map(Duration::from_secs)
    }

    /// Options for publishing a delivery of this trigger
    pub fn publish_options(&self, class: QueueClass, default_retries: u32) -> PublishOptions {
        PublishOptions {
            max_retries: Some(
                self.kind
                    .retry_budget(self.option.max_retries, default_retries),
            ),
            retention: self.option.retention.map(Duration::from_secs),
            deadline: self.timeout(),
            unique_ttl: self.option.unique_ttl.map(Duration::from_secs),
            class,
            ..Default::default()
        }
        .with_attribute(TRIGGER_ATTRIBUTE, self.url())
        .with_attribute(DELIVERY_TYPE_ATTRIBUTE, self.kind.as_str())
    }
}

/// Event definition: a named event and the triggers it fans out to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Storage identifier
    #[serde(default)]
    pub id: String,
    /// Name producers publish under
    pub name: String,
    /// Service producing the event
    #[serde(default)]
    pub service_name: String,
    /// Repository of the producing service
    #[serde(default)]
    pub repo_url: String,
    /// Team owning the definition
    #[serde(default)]
    pub team_owner: String,
    /// Origin of the event
    #[serde(rename = "type", default)]
    pub kind: EventType,
    /// Lifecycle state
    #[serde(default)]
    pub state: EventState,
    /// Destinations
    #[serde(default, alias = "consumers")]
    pub triggers: Vec<Trigger>,
}

impl Event {
    /// Checks that the definition can be registered
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyEventName);
        }

        for (index, trigger) in self.triggers.iter().enumerate() {
            if trigger.base_url.trim().is_empty() {
                return Err(ValidationError::MissingBaseUrl(index));
            }
        }

        Ok(())
    }

    /// Whether the event is dispatched
    pub fn is_active(&self) -> bool {
        self.state == EventState::Active
    }
}
