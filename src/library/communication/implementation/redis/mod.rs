//! Redis based implementations of the communication traits
//!
//! Redis hosts two things: the priority [`TaskQueue`] built on sorted sets and lists, and a
//! [`PubSubClient`](super::pubsub::PubSubClient) emulation on top of Redis streams and consumer groups.

mod factory;
mod pubsub;
mod task_queue;

pub use factory::*;
pub use pubsub::*;
pub use task_queue::*;

use thiserror::Error;

#[derive(Debug, Error)]
enum RedisQueueError {
    #[error("stream entry is missing its payload field")]
    MissingPayload,
    #[error("subscription {0} does not exist")]
    UnknownSubscription(String),
}
