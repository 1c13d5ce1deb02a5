use std::fmt::{self, Display, Formatter};

/// Unique identifier for a group of consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerGroupIdentifier {
    /// Expands internal events into per-trigger deliveries
    Dispatcher,
    /// Performs outbound webhook calls
    Delivery,
    /// Persists dead letters into the archive
    Archiver,
    /// Unknown consumer group
    Other(String),
}

impl Display for ConsumerGroupIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::Delivery => write!(f, "delivery"),
            Self::Archiver => write!(f, "archiver"),
            Self::Other(identifier) => write!(f, "{}", identifier),
        }
    }
}

/// Definition of a consumer group
///
/// In a message queue, a group of consumers collaborates to consume messages.
/// Each message is only delivered to one consumer within the same group, identified
/// by a [`ConsumerGroupIdentifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroupDescriptor {
    identifier: ConsumerGroupIdentifier,
}

impl ConsumerGroupDescriptor {
    /// Creates a new instance from raw parts
    pub fn new(identifier: ConsumerGroupIdentifier) -> Self {
        Self { identifier }
    }

    /// Unique identifier of the group
    pub fn identifier(&self) -> &ConsumerGroupIdentifier {
        &self.identifier
    }

    /// Name of the backend subscription for a given topic
    pub fn subscription(&self, topic: &str) -> String {
        format!("{}.{}", topic, self.identifier)
    }
}

/// Unique identifier of a consumer within a [`ConsumerGroup`](ConsumerGroupDescriptor)
pub type ConsumerIdentifier = String;
