//! Publish and consume measurements feeding the insights

mod recorder;
mod store;

pub use recorder::*;
pub use store::*;

use crate::library::communication::event::Transition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single publish or consume of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    /// Topic the message travelled on
    pub topic_name: String,
    /// Consumer group that processed the message, empty for publishes
    #[serde(default)]
    pub consumer_name: String,
    #[allow(missing_docs)]
    pub time_started: DateTime<Utc>,
    #[allow(missing_docs)]
    pub time_ended: DateTime<Utc>,
    /// Time between start and end
    pub duration_ms: i64,
    /// Whether the operation succeeded
    pub ack: bool,
}

impl Metric {
    /// Whether this records a publish rather than a consume
    pub fn is_publish(&self) -> bool {
        self.consumer_name.is_empty()
    }
}

impl From<Transition> for Metric {
    fn from(transition: Transition) -> Self {
        Self {
            duration_ms: (transition.ended - transition.started)
                .num_milliseconds()
                .max(0),
            topic_name: transition.topic,
            consumer_name: transition.consumer.unwrap_or_default(),
            time_started: transition.started,
            time_ended: transition.ended,
            ack: transition.success,
        }
    }
}
