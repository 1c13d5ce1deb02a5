use super::super::super::event::{
    ConsumerGroupDescriptor, DeadLetter, PublishOptions, QueueDescriptor, QueueProvider,
    RawNotificationPublisher, RawQueueEntry, RetryDecision, RetryPolicy, MAX_RETRIES_ATTRIBUTE,
    ORIGINAL_TOPIC_ATTRIBUTE, RETRY_COUNT_ATTRIBUTE,
};
use super::super::super::BlackboxError;
use super::super::json::{JsonNotificationPublisher, JsonQueueEntry};
use super::{PubSubClient, PubSubMessage, ReceivedMessage};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Tunables of the [`PubSubQueue`]
#[derive(Debug, Clone)]
pub struct PubSubSettings {
    /// Maximum number of messages held by one subscription stream at once
    pub max_outstanding_messages: usize,
    /// Maximum payload bytes held by one subscription stream at once
    pub max_outstanding_bytes: usize,
    /// Ack deadline of created subscriptions, extended while a message is processed
    pub ack_deadline: Duration,
    /// Time a single pull may wait for messages
    pub pull_wait: Duration,
    /// Delay schedule for rejected messages
    pub retry: RetryPolicy,
    /// Retry budget for messages published without an explicit one
    pub max_retries: u32,
    /// Topic exhausted messages are forwarded to
    pub dead_letter_queue: Option<QueueDescriptor>,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 100,
            max_outstanding_bytes: 10 * 1024 * 1024,
            ack_deadline: Duration::from_secs(60),
            pull_wait: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            max_retries: 5,
            dead_letter_queue: None,
        }
    }
}

struct Inner {
    client: Arc<dyn PubSubClient>,
    settings: PubSubSettings,
    topics: Mutex<HashSet<String>>,
    subscriptions: Mutex<HashSet<String>>,
}

/// Queue backend on top of a [`PubSubClient`]
#[derive(Clone)]
pub struct PubSubQueue {
    inner: Arc<Inner>,
}

impl PubSubQueue {
    /// Creates a new instance around a client
    pub fn new(client: Arc<dyn PubSubClient>, settings: PubSubSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                settings,
                topics: Mutex::new(HashSet::new()),
                subscriptions: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Creates the topic unless it has been seen before by this instance or already exists
    async fn ensure_topic(&self, topic: &str) -> EmptyResult {
        let mut known = self.inner.topics.lock().await;
        if known.contains(topic) {
            return Ok(());
        }

        if !self.inner.client.topic_exists(topic).await? {
            info!(topic, "Creating topic");
            self.inner.client.create_topic(topic).await?;
        }

        known.insert(topic.to_owned());
        Ok(())
    }

    async fn ensure_subscription(&self, subscription: &str, topic: &str) -> EmptyResult {
        let mut known = self.inner.subscriptions.lock().await;
        if known.contains(subscription) {
            return Ok(());
        }

        if !self.inner.client.subscription_exists(subscription).await? {
            info!(subscription, topic, "Creating subscription");
            self.inner
                .client
                .create_subscription(subscription, topic, self.inner.settings.ack_deadline)
                .await?;
        }

        known.insert(subscription.to_owned());
        Ok(())
    }

    async fn dead_letter(
        &self,
        topic: &str,
        message: &PubSubMessage,
        reason: BlackboxError,
        attempts: u32,
    ) -> EmptyResult {
        let queue = match &self.inner.settings.dead_letter_queue {
            Some(queue) if queue.key() != topic => queue,
            _ => {
                error!(
                    topic,
                    attempts, "Dropping message after exhausting its retries: {}", reason.summary()
                );
                return Ok(());
            }
        };

        let mut attributes = message.attributes.clone();
        attributes.insert(ORIGINAL_TOPIC_ATTRIBUTE.into(), topic.to_owned());

        let letter = DeadLetter::new(topic.to_owned(), attributes, &message.data, reason, attempts);
        let mut letter_attributes = HashMap::new();
        letter_attributes.insert(ORIGINAL_TOPIC_ATTRIBUTE.to_owned(), topic.to_owned());

        self.ensure_topic(queue.key()).await?;
        self.inner
            .client
            .publish(
                queue.key(),
                PubSubMessage {
                    data: serde_json::to_vec(&letter)?,
                    attributes: letter_attributes,
                },
            )
            .await?;

        warn!(topic, attempts, "Forwarded message to dead-letter topic");
        Ok(())
    }
}

#[async_trait]
impl RawNotificationPublisher for PubSubQueue {
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: QueueDescriptor,
        options: &PublishOptions,
    ) -> EmptyResult {
        let topic = descriptor.key();
        self.ensure_topic(topic).await?;

        let mut attributes = options.attributes.clone();
        attributes
            .entry(RETRY_COUNT_ATTRIBUTE.to_owned())
            .or_insert_with(|| "0".to_owned());

        if let Some(max_retries) = options.max_retries {
            attributes.insert(MAX_RETRIES_ATTRIBUTE.to_owned(), max_retries.to_string());
        }

        let id = self
            .inner
            .client
            .publish(
                topic,
                PubSubMessage {
                    data: data.to_vec(),
                    attributes,
                },
            )
            .await?;

        debug!(topic, %id, "Published message");
        Ok(())
    }
}

impl JsonNotificationPublisher for PubSubQueue {}

#[async_trait]
impl QueueProvider for PubSubQueue {
    type Entry = PubSubEntry;

    /// Provisions the topic and the subscription of the group, then pulls messages while
    /// holding at most the configured number of messages and bytes.
    async fn consume(
        &self,
        queue: QueueDescriptor,
        group: &ConsumerGroupDescriptor,
        consumer: &str, // &ConsumerIdentifier
        batch_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Result<BoxStream<'static, Result<Self::Entry, BoxedError>>, BoxedError> {
        let topic = queue.key().to_owned();
        let subscription = group.subscription(&topic);

        self.ensure_topic(&topic).await?;
        self.ensure_subscription(&subscription, &topic).await?;

        info!(consumer, %subscription, "Consuming subscription");

        let settings = &self.inner.settings;
        let state = PullState {
            queue: self.clone(),
            topic,
            subscription,
            batch_size: batch_size.max(1),
            idle_timeout,
            idle_since: Instant::now(),
            buffer: VecDeque::new(),
            messages: Arc::new(Semaphore::new(settings.max_outstanding_messages.max(1))),
            bytes: Arc::new(Semaphore::new(settings.max_outstanding_bytes.max(1))),
            max_bytes: settings.max_outstanding_bytes.max(1),
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(received) = state.buffer.pop_front() {
                    let entry = state.admit(received).await;
                    return Some((entry, state));
                }

                let settings = &state.queue.inner.settings;
                let max_messages = state
                    .batch_size
                    .min(state.messages.available_permits().max(1));

                let pulled = state
                    .queue
                    .inner
                    .client
                    .pull(&state.subscription, max_messages, settings.pull_wait)
                    .await;

                match pulled {
                    Ok(messages) if !messages.is_empty() => {
                        state.buffer.extend(messages);
                        state.idle_since = Instant::now();
                    }
                    Ok(_) => {
                        if let Some(timeout) = state.idle_timeout {
                            if state.idle_since.elapsed() >= timeout {
                                return None;
                            }
                        }
                    }
                    Err(e) => {
                        sleep(ERROR_PAUSE).await;
                        return Some((Err(e), state));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

struct PullState {
    queue: PubSubQueue,
    topic: String,
    subscription: String,
    batch_size: usize,
    idle_timeout: Option<Duration>,
    idle_since: Instant,
    buffer: VecDeque<ReceivedMessage>,
    messages: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
    max_bytes: usize,
}

impl PullState {
    /// Waits until the message fits into the flow control limits
    async fn admit(&self, received: ReceivedMessage) -> Result<PubSubEntry, BoxedError> {
        let message_permit = self.messages.clone().acquire_owned().await?;

        let size = received
            .message
            .data
            .len()
            .clamp(1, self.max_bytes)
            .min(u32::MAX as usize) as u32;
        let byte_permit = self.bytes.clone().acquire_many_owned(size).await?;

        Ok(PubSubEntry::new(
            self.queue.clone(),
            self.topic.clone(),
            self.subscription.clone(),
            received,
            [message_permit, byte_permit],
        ))
    }
}

/// Periodically pushes the ack deadline of a message out until the returned sender is dropped
fn spawn_deadline_keeper(
    client: Arc<dyn PubSubClient>,
    subscription: String,
    ack_id: String,
    deadline: Duration,
) -> oneshot::Sender<()> {
    let (sender, mut stopped) = oneshot::channel::<()>();
    let period = (deadline / 2).max(Duration::from_millis(100));

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    if let Err(e) = client.modify_ack_deadline(&subscription, &ack_id, deadline).await {
                        warn!(%subscription, %ack_id, "Failed to extend ack deadline: {}", e);
                    }
                }
            }
        }
    });

    sender
}

/// Publishes the retry copy after `delay` and acknowledges the original afterwards
fn spawn_retry(
    client: Arc<dyn PubSubClient>,
    topic: String,
    subscription: String,
    ack_id: String,
    message: PubSubMessage,
    delay: Duration,
    keeper: Option<oneshot::Sender<()>>,
) {
    tokio::spawn(async move {
        sleep(delay).await;

        match client.publish(&topic, message).await {
            Ok(_) => {
                if let Err(e) = client.acknowledge(&subscription, &ack_id).await {
                    warn!(
                        %subscription,
                        %ack_id,
                        "Failed to acknowledge retried message: {}",
                        e
                    );
                }
            }
            Err(e) => warn!(%topic, "Failed to re-publish message, awaiting redelivery: {}", e),
        }

        drop(keeper);
    });
}

/// Message pulled from a subscription of the [`PubSubQueue`]
pub struct PubSubEntry {
    queue: PubSubQueue,
    topic: String,
    subscription: String,
    received: ReceivedMessage,
    retried: u32,
    keeper: Option<oneshot::Sender<()>>,
    _permits: [OwnedSemaphorePermit; 2],
}

impl PubSubEntry {
    fn new(
        queue: PubSubQueue,
        topic: String,
        subscription: String,
        received: ReceivedMessage,
        permits: [OwnedSemaphorePermit; 2],
    ) -> Self {
        let keeper = spawn_deadline_keeper(
            queue.inner.client.clone(),
            subscription.clone(),
            received.ack_id.clone(),
            queue.inner.settings.ack_deadline,
        );

        let retried = attribute(&received.message.attributes, RETRY_COUNT_ATTRIBUTE).unwrap_or(0);

        Self {
            queue,
            topic,
            subscription,
            received,
            retried,
            keeper: Some(keeper),
            _permits: permits,
        }
    }

    fn max_retries(&self) -> u32 {
        attribute(&self.received.message.attributes, MAX_RETRIES_ATTRIBUTE)
            .unwrap_or(self.queue.inner.settings.max_retries)
    }

    async fn settle(&mut self) -> EmptyResult {
        self.keeper.take();
        self.queue
            .inner
            .client
            .acknowledge(&self.subscription, &self.received.ack_id)
            .await
    }
}

fn attribute(attributes: &HashMap<String, String>, key: &str) -> Option<u32> {
    attributes.get(key).and_then(|value| value.parse().ok())
}

#[async_trait]
impl RawQueueEntry for PubSubEntry {
    fn payload(&self) -> &[u8] {
        &self.received.message.data
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.received.message.attributes
    }

    fn delivery_attempt(&self) -> u32 {
        self.retried + self.received.delivery_attempt.max(1)
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        self.settle().await
    }

    /// Schedules a re-publish after the retry delay or forwards the message to the dead-letter
    /// topic once the retry budget is exhausted.
    ///
    /// Retries return right away and release the flow control permits. The original message
    /// keeps its ack deadline extended and is acknowledged once the copy is published, a failed
    /// re-publish leaves it to the redelivery of the subscription.
    async fn reject(&mut self, reason: BlackboxError) -> EmptyResult {
        match self
            .queue
            .inner
            .settings
            .retry
            .decide(self.retried, self.max_retries())
        {
            RetryDecision::Retry { attempt, delay } => {
                debug!(topic = %self.topic, attempt, ?delay, "Retrying message");

                let mut message = self.received.message.clone();
                message
                    .attributes
                    .insert(RETRY_COUNT_ATTRIBUTE.to_owned(), attempt.to_string());

                spawn_retry(
                    self.queue.inner.client.clone(),
                    self.topic.clone(),
                    self.subscription.clone(),
                    self.received.ack_id.clone(),
                    message,
                    delay,
                    self.keeper.take(),
                );

                Ok(())
            }
            RetryDecision::Archive => {
                self.queue
                    .dead_letter(&self.topic, &self.received.message, reason, self.retried + 1)
                    .await?;

                self.settle().await
            }
        }
    }
}

impl JsonQueueEntry for PubSubEntry {}

#[cfg(test)]
mod does {
    use super::super::MemoryPubSubClient;
    use super::*;
    use crate::library::communication::event::{ConsumerGroupIdentifier, QueueEntry};
    use tokio::time::timeout;

    const TOPIC: &str = "orders";
    const DEAD_LETTERS: &str = "orders.dead";

    fn settings() -> PubSubSettings {
        PubSubSettings {
            pull_wait: Duration::from_millis(20),
            retry: RetryPolicy::fixed(Duration::from_millis(5)),
            max_retries: 1,
            dead_letter_queue: Some(QueueDescriptor::new(DEAD_LETTERS.into(), 100)),
            ..Default::default()
        }
    }

    fn group() -> ConsumerGroupDescriptor {
        ConsumerGroupDescriptor::new(ConsumerGroupIdentifier::Delivery)
    }

    fn descriptor() -> QueueDescriptor {
        QueueDescriptor::new(TOPIC.into(), 100)
    }

    async fn next_entry(
        stream: &mut BoxStream<'static, Result<PubSubEntry, BoxedError>>,
    ) -> PubSubEntry {
        timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("no entry within timeout")
            .expect("stream ended")
            .expect("entry failed")
    }

    #[tokio::test]
    async fn provision_topics_and_subscriptions_lazily() {
        let client = MemoryPubSubClient::new();
        let queue = PubSubQueue::new(Arc::new(client.clone()), settings());

        assert!(!client.topic_exists(TOPIC).await.unwrap());

        let _stream = queue
            .consume(descriptor(), &group(), "test", 10, None)
            .await
            .unwrap();

        assert!(client.topic_exists(TOPIC).await.unwrap());
        assert!(client.subscription_exists("orders.delivery").await.unwrap());
    }

    #[tokio::test]
    async fn deliver_and_acknowledge() {
        let client = MemoryPubSubClient::new();
        let queue = PubSubQueue::new(Arc::new(client.clone()), settings());
        let mut stream = queue
            .consume(descriptor(), &group(), "test", 10, None)
            .await
            .unwrap();

        queue
            .publish_raw(b"42", descriptor(), &PublishOptions::default())
            .await
            .unwrap();

        let mut entry = next_entry(&mut stream).await;
        assert_eq!(entry.parse_payload::<u32>().unwrap(), 42);
        assert_eq!(entry.delivery_attempt(), 1);
        assert_eq!(
            entry.attributes().get(RETRY_COUNT_ATTRIBUTE).map(String::as_str),
            Some("0")
        );

        entry.acknowledge().await.unwrap();
        drop(entry);

        let nothing = timeout(Duration::from_millis(100), stream.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn republish_rejected_messages_with_incremented_retry_count() {
        let client = MemoryPubSubClient::new();
        let queue = PubSubQueue::new(Arc::new(client.clone()), settings());
        let mut stream = queue
            .consume(descriptor(), &group(), "test", 10, None)
            .await
            .unwrap();

        queue
            .publish_raw(b"42", descriptor(), &PublishOptions::default())
            .await
            .unwrap();

        let mut first = next_entry(&mut stream).await;
        first
            .reject(BlackboxError::from_message("status 500"))
            .await
            .unwrap();
        drop(first);

        let second = next_entry(&mut stream).await;
        assert_eq!(
            second.attributes().get(RETRY_COUNT_ATTRIBUTE).map(String::as_str),
            Some("1")
        );
        assert_eq!(second.delivery_attempt(), 2);
    }

    #[tokio::test]
    async fn release_flow_control_while_a_retry_is_pending() {
        let client = MemoryPubSubClient::new();
        let queue = PubSubQueue::new(
            Arc::new(client.clone()),
            PubSubSettings {
                max_outstanding_messages: 1,
                retry: RetryPolicy::fixed(Duration::from_millis(300)),
                ..settings()
            },
        );
        let mut stream = queue
            .consume(descriptor(), &group(), "test", 10, None)
            .await
            .unwrap();

        for value in [b"1", b"2"] {
            queue
                .publish_raw(value, descriptor(), &PublishOptions::default())
                .await
                .unwrap();
        }

        let mut first = next_entry(&mut stream).await;
        assert_eq!(first.payload(), b"1");
        timeout(
            Duration::from_millis(100),
            first.reject(BlackboxError::from_message("status 500")),
        )
        .await
        .expect("reject waited for the retry delay")
        .unwrap();
        drop(first);

        let mut second = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("healthy message was blocked by the pending retry")
            .unwrap()
            .unwrap();
        assert_eq!(second.payload(), b"2");
        second.acknowledge().await.unwrap();
        drop(second);

        let retried = next_entry(&mut stream).await;
        assert_eq!(retried.payload(), b"1");
        assert_eq!(
            retried.attributes().get(RETRY_COUNT_ATTRIBUTE).map(String::as_str),
            Some("1")
        );
    }

    #[tokio::test]
    async fn forward_exhausted_messages_to_dead_letter_topic() {
        let client = MemoryPubSubClient::new();
        client.create_topic(DEAD_LETTERS).await.unwrap();
        client
            .create_subscription("orders.dead.archiver", DEAD_LETTERS, Duration::from_secs(60))
            .await
            .unwrap();

        let queue = PubSubQueue::new(Arc::new(client.clone()), settings());
        let mut stream = queue
            .consume(descriptor(), &group(), "test", 10, None)
            .await
            .unwrap();

        let options = PublishOptions {
            max_retries: Some(0),
            ..Default::default()
        };
        queue.publish_raw(b"42", descriptor(), &options).await.unwrap();

        let mut entry = next_entry(&mut stream).await;
        entry
            .reject(BlackboxError::from_message("status 500"))
            .await
            .unwrap();

        let letters = client
            .pull("orders.dead.archiver", 10, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(letters.len(), 1);

        let letter: DeadLetter = serde_json::from_slice(&letters[0].message.data).unwrap();
        assert_eq!(letter.topic, TOPIC);
        assert_eq!(letter.payload, "42");
        assert_eq!(letter.attempts, 1);
        assert_eq!(letter.reason, BlackboxError::from_message("status 500"));
        assert_eq!(
            letter.attributes.get(ORIGINAL_TOPIC_ATTRIBUTE).map(String::as_str),
            Some(TOPIC)
        );
    }

    #[tokio::test]
    async fn bound_outstanding_messages() {
        let client = MemoryPubSubClient::new();
        let queue = PubSubQueue::new(
            Arc::new(client.clone()),
            PubSubSettings {
                max_outstanding_messages: 1,
                ..settings()
            },
        );
        let mut stream = queue
            .consume(descriptor(), &group(), "test", 10, None)
            .await
            .unwrap();

        for value in [b"1", b"2"] {
            queue
                .publish_raw(value, descriptor(), &PublishOptions::default())
                .await
                .unwrap();
        }

        let first = next_entry(&mut stream).await;
        let blocked = timeout(Duration::from_millis(100), stream.next()).await;
        assert!(blocked.is_err());

        drop(first);
        let second = next_entry(&mut stream).await;
        assert_eq!(second.payload(), b"2");
    }
}
