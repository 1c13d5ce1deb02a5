use super::{PubSubClient, PubSubMessage, ReceivedMessage};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

const WAKEUP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
enum MemoryPubSubError {
    #[error("topic {0} does not exist")]
    UnknownTopic(String),
    #[error("subscription {0} does not exist")]
    UnknownSubscription(String),
    #[error("subscription {0} already exists")]
    SubscriptionExists(String),
}

#[derive(Debug)]
struct Pending {
    message: PubSubMessage,
    attempts: u32,
}

#[derive(Debug)]
struct Outstanding {
    message: PubSubMessage,
    attempts: u32,
    deadline: Instant,
}

#[derive(Debug)]
struct Subscription {
    ack_deadline: Duration,
    backlog: VecDeque<Pending>,
    outstanding: HashMap<String, Outstanding>,
}

impl Subscription {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, outstanding)| outstanding.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        for ack_id in expired {
            if let Some(outstanding) = self.outstanding.remove(&ack_id) {
                self.backlog.push_back(Pending {
                    message: outstanding.message,
                    attempts: outstanding.attempts,
                });
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, Subscription>,
    sequence: u64,
}

/// In-process emulation of a pub/sub service
///
/// Mirrors the delivery semantics of the real thing (per subscription copies, ack deadlines,
/// redelivery) and is used for local development and tests.
#[derive(Clone, Default)]
pub struct MemoryPubSubClient {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl MemoryPubSubClient {
    /// Creates an empty instance without any topics
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting to be pulled from a subscription
    pub fn backlog(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .subscriptions
                    .get(subscription)
                    .map(|s| s.backlog.len())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, BoxedError> {
        self.state
            .lock()
            .map_err(|_| "in-memory pub/sub state is poisoned".into())
    }

    fn take(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>, BoxedError> {
        let mut state = self.lock()?;
        state.sequence += 1;
        let batch = state.sequence;

        let subscription_state = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| MemoryPubSubError::UnknownSubscription(subscription.to_owned()))?;

        let now = Instant::now();
        subscription_state.requeue_expired(now);

        let mut received = Vec::new();
        while received.len() < max_messages {
            let pending = match subscription_state.backlog.pop_front() {
                Some(pending) => pending,
                None => break,
            };

            let ack_id = format!("{}-{}-{}", subscription, batch, received.len());
            let attempts = pending.attempts + 1;

            received.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message: pending.message.clone(),
                delivery_attempt: attempts,
            });

            subscription_state.outstanding.insert(
                ack_id,
                Outstanding {
                    message: pending.message,
                    attempts,
                    deadline: now + subscription_state.ack_deadline,
                },
            );
        }

        Ok(received)
    }
}

#[async_trait]
impl PubSubClient for MemoryPubSubClient {
    async fn topic_exists(&self, topic: &str) -> Result<bool, BoxedError> {
        Ok(self.lock()?.topics.contains_key(topic))
    }

    async fn create_topic(&self, topic: &str) -> EmptyResult {
        self.lock()?.topics.entry(topic.to_owned()).or_default();
        Ok(())
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, BoxedError> {
        Ok(self.lock()?.subscriptions.contains_key(subscription))
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> EmptyResult {
        let mut state = self.lock()?;

        if state.subscriptions.contains_key(subscription) {
            return Err(MemoryPubSubError::SubscriptionExists(subscription.to_owned()).into());
        }

        state
            .topics
            .get_mut(topic)
            .ok_or_else(|| MemoryPubSubError::UnknownTopic(topic.to_owned()))?
            .push(subscription.to_owned());

        state.subscriptions.insert(
            subscription.to_owned(),
            Subscription {
                ack_deadline,
                backlog: VecDeque::new(),
                outstanding: HashMap::new(),
            },
        );

        Ok(())
    }

    async fn publish(&self, topic: &str, message: PubSubMessage) -> Result<String, BoxedError> {
        let id = {
            let mut state = self.lock()?;
            let subscriptions = state
                .topics
                .get(topic)
                .cloned()
                .ok_or_else(|| MemoryPubSubError::UnknownTopic(topic.to_owned()))?;

            for name in subscriptions {
                if let Some(subscription) = state.subscriptions.get_mut(&name) {
                    subscription.backlog.push_back(Pending {
                        message: message.clone(),
                        attempts: 0,
                    });
                }
            }

            state.sequence += 1;
            state.sequence.to_string()
        };

        self.notify.notify_waiters();

        Ok(id)
    }

    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BoxedError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            let received = self.take(subscription, max_messages.max(1))?;

            if !received.is_empty() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(received);
            }

            timeout((deadline - now).min(WAKEUP_INTERVAL), notified)
                .await
                .ok();
        }
    }

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> EmptyResult {
        let mut state = self.lock()?;

        if let Some(subscription) = state.subscriptions.get_mut(subscription) {
            subscription.outstanding.remove(ack_id);
        }

        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_id: &str,
        deadline: Duration,
    ) -> EmptyResult {
        {
            let mut state = self.lock()?;
            let subscription = match state.subscriptions.get_mut(subscription) {
                Some(subscription) => subscription,
                None => return Ok(()),
            };

            if deadline == Duration::ZERO {
                if let Some(outstanding) = subscription.outstanding.remove(ack_id) {
                    subscription.backlog.push_front(Pending {
                        message: outstanding.message,
                        attempts: outstanding.attempts,
                    });
                }
            } else if let Some(outstanding) = subscription.outstanding.get_mut(ack_id) {
                outstanding.deadline = Instant::now() + deadline;
            }
        }

        self.notify.notify_waiters();

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;

    fn message(data: &str) -> PubSubMessage {
        PubSubMessage {
            data: data.as_bytes().to_vec(),
            attributes: HashMap::new(),
        }
    }

    async fn client_with_subscription(ack_deadline: Duration) -> MemoryPubSubClient {
        let client = MemoryPubSubClient::new();
        client.create_topic("orders").await.unwrap();
        client
            .create_subscription("orders.worker", "orders", ack_deadline)
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn reject_publishes_to_unknown_topics() {
        let client = MemoryPubSubClient::new();
        assert!(client.publish("orders", message("1")).await.is_err());
    }

    #[tokio::test]
    async fn copy_messages_into_every_subscription() {
        let client = client_with_subscription(Duration::from_secs(60)).await;
        client
            .create_subscription("orders.audit", "orders", Duration::from_secs(60))
            .await
            .unwrap();

        client.publish("orders", message("1")).await.unwrap();

        assert_eq!(client.backlog("orders.worker"), 1);
        assert_eq!(client.backlog("orders.audit"), 1);
    }

    #[tokio::test]
    async fn not_redeliver_acknowledged_messages() {
        let client = client_with_subscription(Duration::from_millis(20)).await;
        client.publish("orders", message("1")).await.unwrap();

        let received = client
            .pull("orders.worker", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        client
            .acknowledge("orders.worker", &received[0].ack_id)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let again = client
            .pull("orders.worker", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn redeliver_after_deadline() {
        let client = client_with_subscription(Duration::from_millis(20)).await;
        client.publish("orders", message("1")).await.unwrap();

        let first = client
            .pull("orders.worker", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first[0].delivery_attempt, 1);

        let second = client
            .pull("orders.worker", 10, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivery_attempt, 2);
        assert_eq!(second[0].message, message("1"));
    }

    #[tokio::test]
    async fn nack_with_zero_deadline() {
        let client = client_with_subscription(Duration::from_secs(60)).await;
        client.publish("orders", message("1")).await.unwrap();

        let first = client
            .pull("orders.worker", 10, Duration::from_millis(10))
            .await
            .unwrap();
        client
            .modify_ack_deadline("orders.worker", &first[0].ack_id, Duration::ZERO)
            .await
            .unwrap();

        let second = client
            .pull("orders.worker", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn wake_up_waiting_pulls() {
        let client = client_with_subscription(Duration::from_secs(60)).await;
        let publisher = client.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("orders", message("late")).await.unwrap();
        });

        let received = client
            .pull("orders.worker", 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
    }
}
