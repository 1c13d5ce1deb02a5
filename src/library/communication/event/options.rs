use super::QueueError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Backend family a notification is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueClass {
    /// Redis backed task queue with priorities, scheduling and uniqueness
    TaskQueue,
    /// Topic/subscription based publish-subscribe service
    PubSub,
}

impl Default for QueueClass {
    fn default() -> Self {
        Self::TaskQueue
    }
}

impl QueueClass {
    /// Canonical tag of the class
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskQueue => "task-queue",
            Self::PubSub => "pubsub",
        }
    }
}

impl Display for QueueClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueClass {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task-queue" | "taskqueue" | "task_queue" | "local" => Ok(Self::TaskQueue),
            "pubsub" | "pub-sub" | "pub_sub" | "cloud" => Ok(Self::PubSub),
            _ => Err(QueueError::UnknownClass(s.to_owned())),
        }
    }
}

/// Named priority lane of the task queue, drained strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Always drained first
    Critical,
    /// Regular work
    Default,
    /// Drained only when nothing else is pending
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Default
    }
}

impl Priority {
    /// All priorities, highest first
    pub const ORDERED: [Priority; 3] = [Priority::Critical, Priority::Default, Priority::Low];

    /// Lane name as used in backend keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
            Self::Low => "low",
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "default" | "" => Ok(Self::Default),
            "low" => Ok(Self::Low),
            _ => Err(QueueError::UnknownPriority(s.to_owned())),
        }
    }
}

/// Delivery parameters attached to a single publish
///
/// Each backend translates the fields it understands and ignores the rest. The pub/sub
/// backend for example has no notion of priorities, scheduling, retention or uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Key/value pairs travelling alongside the payload
    pub attributes: HashMap<String, String>,
    /// Number of retries after the first failed attempt before the message is dead-lettered
    pub max_retries: Option<u32>,
    /// How long a completed task is retained for inspection
    pub retention: Option<Duration>,
    /// Processing deadline of a single attempt
    pub deadline: Option<Duration>,
    /// Window in which identical payloads on the same topic are rejected as duplicates
    pub unique_ttl: Option<Duration>,
    /// Delay before the notification becomes eligible for processing
    pub schedule_in: Option<Duration>,
    /// Priority lane
    pub priority: Priority,
    /// Backend selection
    pub class: QueueClass,
}

impl PublishOptions {
    /// Default options routed to the given class
    pub fn for_class(class: QueueClass) -> Self {
        Self {
            class,
            ..Default::default()
        }
    }

    /// Adds an attribute
    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
