use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Message as it is stored on a topic
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PubSubMessage {
    /// Opaque payload
    pub data: Vec<u8>,
    /// Key/value attributes
    pub attributes: HashMap<String, String>,
}

/// Message handed out by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Handle used to acknowledge or extend the message
    pub ack_id: String,
    /// Message content
    pub message: PubSubMessage,
    /// How often the subscription handed out this message, starting at 1
    pub delivery_attempt: u32,
}

/// Minimal surface of a topic/subscription messaging service
///
/// Messages published to a topic are copied into every subscription of that topic. A pulled
/// message is redelivered once its ack deadline elapses without an acknowledgement.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    /// Whether the topic exists
    async fn topic_exists(&self, topic: &str) -> Result<bool, BoxedError>;

    /// Creates the topic
    async fn create_topic(&self, topic: &str) -> EmptyResult;

    /// Whether the subscription exists
    async fn subscription_exists(&self, subscription: &str) -> Result<bool, BoxedError>;

    /// Creates a subscription on an existing topic
    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> EmptyResult;

    /// Publishes a message and returns its server assigned id
    async fn publish(&self, topic: &str, message: PubSubMessage) -> Result<String, BoxedError>;

    /// Pulls up to `max_messages`, waiting at most `wait` if none are available
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BoxedError>;

    /// Acknowledges a message so it is never redelivered
    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> EmptyResult;

    /// Resets the ack deadline of a message to `deadline` from now.
    /// A zero deadline makes the message available for redelivery immediately.
    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_id: &str,
        deadline: Duration,
    ) -> EmptyResult;
}
