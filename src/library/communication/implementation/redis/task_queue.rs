use super::super::super::event::{
    ConsumerGroupDescriptor, DeadLetter, Priority, PublishOptions, QueueDescriptor, QueueError,
    QueueProvider, RawNotificationPublisher, RawQueueEntry, RetryDecision, RetryPolicy,
    ORIGINAL_TOPIC_ATTRIBUTE,
};
use super::super::super::BlackboxError;
use super::super::json::{JsonNotificationPublisher, JsonQueueEntry};
use super::RedisFactory;
use crate::library::helpers::fingerprint;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "courier:tq";

/// Moves due members of the pending lanes (KEYS[1..n-1], highest priority first)
/// into the lease set (KEYS[n]) and returns them.
const DEQUEUE_SCRIPT: &str = r#"
local active = KEYS[#KEYS]
local now = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local picked = {}
for i = 1, #KEYS - 1 do
    if #picked >= limit then break end
    local due = redis.call('ZRANGEBYSCORE', KEYS[i], '-inf', now, 'LIMIT', 0, limit - #picked)
    for _, member in ipairs(due) do
        redis.call('ZREM', KEYS[i], member)
        local lease = tonumber(cjson.decode(member)['lease_ms'])
        redis.call('ZADD', active, now + lease, member)
        table.insert(picked, member)
    end
end
return picked
"#;

/// Hands members of the lease set (KEYS[1]) whose lease ran out back to their lane (KEYS[2..4]).
const RECOVER_SCRIPT: &str = r#"
local lanes = { critical = KEYS[2], default = KEYS[3], low = KEYS[4] }
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, member in ipairs(expired) do
    redis.call('ZREM', KEYS[1], member)
    local lane = lanes[cjson.decode(member)['priority']] or KEYS[3]
    redis.call('ZADD', lane, ARGV[1], member)
end
return #expired
"#;

fn pending_key(topic: &str, priority: Priority) -> String {
    format!("{}:{}:{}", KEY_PREFIX, topic, priority)
}

fn active_key(topic: &str) -> String {
    format!("{}:{}:active", KEY_PREFIX, topic)
}

fn archived_key(topic: &str) -> String {
    format!("{}:{}:archived", KEY_PREFIX, topic)
}

fn completed_key(topic: &str, id: &str) -> String {
    format!("{}:{}:completed:{}", KEY_PREFIX, topic, id)
}

fn unique_key(topic: &str, payload: &str) -> String {
    format!("{}:{}:unique:{}", KEY_PREFIX, topic, fingerprint([topic, payload]))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

/// Tunables of the [`TaskQueue`]
#[derive(Debug, Clone)]
pub struct TaskQueueSettings {
    /// Retry budget for tasks published without an explicit one
    pub default_max_retries: u32,
    /// Time a consumer may hold a task before it is handed out again
    pub lease: Duration,
    /// Number of archived tasks kept per topic
    pub archive_limit: usize,
    /// Pause between polls of an empty queue
    pub poll_interval: Duration,
    /// Delay schedule for rejected tasks
    pub retry: RetryPolicy,
    /// Topic exhausted tasks are forwarded to
    pub dead_letter_queue: Option<QueueDescriptor>,
}

impl Default for TaskQueueSettings {
    fn default() -> Self {
        Self {
            default_max_retries: 25,
            lease: Duration::from_secs(30 * 60),
            archive_limit: 10_000,
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::exponential(Duration::from_secs(5), Duration::from_secs(3600)),
            dead_letter_queue: None,
        }
    }
}

/// Serialized form of a task while it lives in one of the Redis structures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Unique id of the task
    pub id: String,
    /// Topic the task was published to
    pub topic: String,
    /// Lane the task is queued in
    pub priority: Priority,
    /// Serialized notification
    pub payload: String,
    /// Attributes passed at publish time
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Number of retries so far
    pub retried: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Lease length for a single attempt
    pub lease_ms: i64,
    /// Retention of the completed task
    pub retention_ms: Option<i64>,
    /// Uniqueness lock held by this task
    pub unique_key: Option<String>,
    /// Publish time
    pub enqueued_at: DateTime<Utc>,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
}

impl TaskEnvelope {
    fn new(
        topic: &str,
        payload: String,
        options: &PublishOptions,
        settings: &TaskQueueSettings,
        unique_key: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_owned(),
            priority: options.priority,
            payload,
            attributes: options.attributes.clone(),
            retried: 0,
            max_retries: options.max_retries.unwrap_or(settings.default_max_retries),
            lease_ms: millis(options.deadline.unwrap_or(settings.lease)),
            retention_ms: options.retention.map(millis),
            unique_key,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }
}

/// Priority task queue on Redis sorted sets
///
/// Every topic owns one sorted set per [`Priority`] scored by the time the task becomes due,
/// a lease set of tasks currently handed out, and a bounded list of archived tasks. Dequeuing
/// happens atomically through a Lua script so each task is leased by exactly one consumer.
#[derive(Clone)]
pub struct TaskQueue {
    factory: RedisFactory,
    settings: Arc<TaskQueueSettings>,
}

impl TaskQueue {
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: RedisFactory, settings: TaskQueueSettings) -> Self {
        Self {
            factory,
            settings: Arc::new(settings),
        }
    }

    /// Most recently archived tasks of a topic, newest first
    pub async fn archived(&self, topic: &str, limit: usize) -> Result<Vec<TaskEnvelope>, BoxedError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut con = self.factory.shared();
        let members: Vec<String> = con
            .lrange(archived_key(topic), 0, limit as isize - 1)
            .await?;

        members
            .iter()
            .map(|member| serde_json::from_str(member).map_err(Into::into))
            .collect()
    }

    async fn poll(&self, topic: &str, batch_size: usize) -> Result<Vec<String>, BoxedError> {
        let mut con = self.factory.shared();
        let now = now_ms();

        let recover = Script::new(RECOVER_SCRIPT);
        let mut invocation = recover.prepare_invoke();
        invocation.key(active_key(topic));
        for priority in Priority::ORDERED.iter() {
            invocation.key(pending_key(topic, *priority));
        }
        invocation.arg(now);

        let recovered: usize = invocation.invoke_async(&mut con).await?;
        if recovered > 0 {
            warn!(topic, recovered, "Recovered tasks with expired leases");
        }

        let dequeue = Script::new(DEQUEUE_SCRIPT);
        let mut invocation = dequeue.prepare_invoke();
        for priority in Priority::ORDERED.iter() {
            invocation.key(pending_key(topic, *priority));
        }
        invocation.key(active_key(topic)).arg(now).arg(batch_size.max(1));

        let members: Vec<String> = invocation.invoke_async(&mut con).await?;
        Ok(members)
    }

    async fn forward_dead_letter(&self, envelope: &TaskEnvelope, reason: BlackboxError) {
        let queue = match &self.settings.dead_letter_queue {
            Some(queue) if queue.key() != envelope.topic => queue.clone(),
            _ => return,
        };

        let mut attributes = envelope.attributes.clone();
        attributes.insert(ORIGINAL_TOPIC_ATTRIBUTE.into(), envelope.topic.clone());

        let letter = DeadLetter::new(
            envelope.topic.clone(),
            attributes,
            envelope.payload.as_bytes(),
            reason,
            envelope.retried + 1,
        );

        let result = match serde_json::to_vec(&letter) {
            Ok(data) => {
                self.publish_raw(&data, queue, &PublishOptions::default())
                    .await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            error!(id = %envelope.id, topic = %envelope.topic, "Failed to forward dead letter: {}", e);
        }
    }
}

#[async_trait]
impl RawNotificationPublisher for TaskQueue {
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: QueueDescriptor,
        options: &PublishOptions,
    ) -> EmptyResult {
        let payload = String::from_utf8(data.to_vec())?;
        let topic = descriptor.key();
        let mut con = self.factory.shared();

        let unique = match options.unique_ttl {
            Some(ttl) => {
                let key = unique_key(topic, &payload);
                let acquired: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(now_ms())
                    .arg("NX")
                    .arg("PX")
                    .arg(millis(ttl).max(1))
                    .query_async(&mut con)
                    .await?;

                if acquired.is_none() {
                    return Err(QueueError::Duplicate.into());
                }

                Some(key)
            }
            None => None,
        };

        let envelope = TaskEnvelope::new(topic, payload, options, &self.settings, unique);
        let member = serde_json::to_string(&envelope)?;
        let due = now_ms() + options.schedule_in.map(millis).unwrap_or_default();

        let _: () = con
            .zadd(pending_key(topic, envelope.priority), member, due)
            .await?;

        debug!(id = %envelope.id, topic, priority = %envelope.priority, "Enqueued task");

        Ok(())
    }
}

impl JsonNotificationPublisher for TaskQueue {}

#[async_trait]
impl QueueProvider for TaskQueue {
    type Entry = TaskEntry;

    /// Polls the lanes of the topic in priority order, recovering expired leases on each poll
    async fn consume(
        &self,
        queue: QueueDescriptor,
        _group: &ConsumerGroupDescriptor,
        consumer: &str, // &ConsumerIdentifier
        batch_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Result<BoxStream<'static, Result<Self::Entry, BoxedError>>, BoxedError> {
        info!(consumer, topic = queue.key(), "Consuming task queue");

        let state = PollState {
            queue: self.clone(),
            topic: queue.key().to_owned(),
            batch_size,
            idle_timeout,
            buffer: VecDeque::new(),
            idle_since: Instant::now(),
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(member) = state.buffer.pop_front() {
                    let entry = TaskEntry::new(state.queue.clone(), member);
                    return Some((entry, state));
                }

                match state.queue.poll(&state.topic, state.batch_size).await {
                    Ok(members) if !members.is_empty() => {
                        state.buffer.extend(members);
                        state.idle_since = Instant::now();
                    }
                    Ok(_) => {
                        if let Some(timeout) = state.idle_timeout {
                            if state.idle_since.elapsed() >= timeout {
                                return None;
                            }
                        }

                        sleep(state.queue.settings.poll_interval).await;
                    }
                    Err(e) => {
                        sleep(state.queue.settings.poll_interval).await;
                        return Some((Err(e), state));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

struct PollState {
    queue: TaskQueue,
    topic: String,
    batch_size: usize,
    idle_timeout: Option<Duration>,
    buffer: VecDeque<String>,
    idle_since: Instant,
}

/// Task leased from the [`TaskQueue`]
pub struct TaskEntry {
    queue: TaskQueue,
    member: String,
    envelope: TaskEnvelope,
}

impl TaskEntry {
    fn new(queue: TaskQueue, member: String) -> Result<Self, BoxedError> {
        let envelope = serde_json::from_str(&member)?;

        Ok(Self {
            queue,
            member,
            envelope,
        })
    }

    /// Task as it is stored in Redis
    pub fn envelope(&self) -> &TaskEnvelope {
        &self.envelope
    }
}

#[async_trait]
impl RawQueueEntry for TaskEntry {
    fn payload(&self) -> &[u8] {
        self.envelope.payload.as_bytes()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        &self.envelope.attributes
    }

    fn delivery_attempt(&self) -> u32 {
        self.envelope.retried + 1
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        let topic = &self.envelope.topic;
        let mut con = self.queue.factory.shared();
        let mut pipe = redis::pipe();

        pipe.atomic().zrem(active_key(topic), &self.member).ignore();

        if let Some(retention) = self.envelope.retention_ms {
            pipe.cmd("SET")
                .arg(completed_key(topic, &self.envelope.id))
                .arg(&self.member)
                .arg("PX")
                .arg(retention.max(1))
                .ignore();
        }

        if let Some(key) = &self.envelope.unique_key {
            pipe.del(key).ignore();
        }

        pipe.query_async::<_, ()>(&mut con).await?;

        Ok(())
    }

    async fn reject(&mut self, reason: BlackboxError) -> EmptyResult {
        let topic = self.envelope.topic.clone();
        let mut con = self.queue.factory.shared();
        let mut pipe = redis::pipe();
        pipe.atomic().zrem(active_key(&topic), &self.member).ignore();

        let decision = self
            .queue
            .settings
            .retry
            .decide(self.envelope.retried, self.envelope.max_retries);

        let mut next = self.envelope.clone();
        next.last_error = Some(reason.summary());

        match decision {
            RetryDecision::Retry { attempt, delay } => {
                next.retried = attempt;
                let member = serde_json::to_string(&next)?;
                pipe.zadd(pending_key(&topic, next.priority), member, now_ms() + millis(delay))
                    .ignore();
                pipe.query_async::<_, ()>(&mut con).await?;

                debug!(id = %next.id, topic = %topic, attempt, ?delay, "Scheduled task retry");
            }
            RetryDecision::Archive => {
                let member = serde_json::to_string(&next)?;
                let limit = self.queue.settings.archive_limit.max(1) as isize;
                pipe.lpush(archived_key(&topic), member)
                    .ignore()
                    .ltrim(archived_key(&topic), 0, limit - 1)
                    .ignore();

                if let Some(key) = &next.unique_key {
                    pipe.del(key).ignore();
                }

                pipe.query_async::<_, ()>(&mut con).await?;

                warn!(id = %next.id, topic = %topic, "Archived task after exhausting its retries");
                self.queue.forward_dead_letter(&next, reason).await;
            }
        }

        Ok(())
    }
}

impl JsonQueueEntry for TaskEntry {}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::event::{
        ConsumerGroupDescriptor, ConsumerGroupIdentifier, QueueEntry,
    };
    use tokio::time::timeout;

    type Entries = BoxStream<'static, Result<TaskEntry, BoxedError>>;

    /// Connects to the server named by `REDIS_URL`, tests using it are `#[ignore]`d by default
    async fn task_queue(settings: TaskQueueSettings) -> TaskQueue {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let factory = RedisFactory::connect(&url).await.unwrap();

        TaskQueue::new(
            factory,
            TaskQueueSettings {
                poll_interval: Duration::from_millis(10),
                retry: RetryPolicy::fixed(Duration::from_millis(10)),
                ..settings
            },
        )
    }

    /// Fresh topic so concurrently running tests never share keys
    fn topic() -> QueueDescriptor {
        QueueDescriptor::new(format!("test.{}", Uuid::new_v4()), 100)
    }

    async fn subscribe(queue: &TaskQueue, topic: &QueueDescriptor) -> Entries {
        let group = ConsumerGroupDescriptor::new(ConsumerGroupIdentifier::Delivery);
        queue
            .consume(topic.clone(), &group, "test", 10, None)
            .await
            .unwrap()
    }

    async fn next_entry(entries: &mut Entries) -> TaskEntry {
        timeout(Duration::from_secs(2), entries.next())
            .await
            .expect("no task within timeout")
            .expect("stream ended")
            .expect("task failed")
    }

    async fn publish(
        queue: &TaskQueue,
        topic: &QueueDescriptor,
        value: u32,
        options: PublishOptions,
    ) {
        queue
            .publish_raw(value.to_string().as_bytes(), topic.clone(), &options)
            .await
            .unwrap();
    }

    #[ignore]
    #[tokio::test]
    async fn hand_out_tasks_by_priority() {
        let queue = task_queue(TaskQueueSettings::default()).await;
        let topic = topic();

        let lanes = [
            (1, Priority::Low),
            (2, Priority::Default),
            (3, Priority::Critical),
        ];

        for (value, priority) in lanes {
            let options = PublishOptions {
                priority,
                ..Default::default()
            };
            publish(&queue, &topic, value, options).await;
        }

        let mut entries = subscribe(&queue, &topic).await;
        let mut order = Vec::new();
        for _ in 0..3 {
            let mut entry = next_entry(&mut entries).await;
            order.push(entry.parse_payload::<u32>().unwrap());
            entry.acknowledge().await.unwrap();
        }

        assert_eq!(order, vec![3, 2, 1]);
    }

    #[ignore]
    #[tokio::test]
    async fn hold_back_scheduled_tasks() {
        let queue = task_queue(TaskQueueSettings::default()).await;
        let topic = topic();

        let delayed = PublishOptions {
            schedule_in: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        publish(&queue, &topic, 1, delayed).await;
        publish(&queue, &topic, 2, PublishOptions::default()).await;

        let mut entries = subscribe(&queue, &topic).await;
        let mut first = next_entry(&mut entries).await;
        assert_eq!(first.parse_payload::<u32>().unwrap(), 2);
        first.acknowledge().await.unwrap();

        let early = timeout(Duration::from_millis(200), entries.next()).await;
        assert!(early.is_err());

        let mut second = next_entry(&mut entries).await;
        assert_eq!(second.parse_payload::<u32>().unwrap(), 1);
        second.acknowledge().await.unwrap();
    }

    #[ignore]
    #[tokio::test]
    async fn reject_duplicates_within_the_unique_window() {
        let queue = task_queue(TaskQueueSettings::default()).await;
        let topic = topic();
        let unique = PublishOptions {
            unique_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        publish(&queue, &topic, 1, unique.clone()).await;

        let duplicate = queue
            .publish_raw(b"1", topic.clone(), &unique)
            .await
            .unwrap_err();
        assert_eq!(duplicate.downcast_ref::<QueueError>(), Some(&QueueError::Duplicate));

        let mut entries = subscribe(&queue, &topic).await;
        next_entry(&mut entries).await.acknowledge().await.unwrap();

        publish(&queue, &topic, 1, unique).await;
    }

    #[ignore]
    #[tokio::test]
    async fn recover_tasks_with_expired_leases() {
        let queue = task_queue(TaskQueueSettings::default()).await;
        let topic = topic();
        let short_lease = PublishOptions {
            deadline: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        publish(&queue, &topic, 1, short_lease).await;

        let mut entries = subscribe(&queue, &topic).await;
        let abandoned = next_entry(&mut entries).await;
        let id = abandoned.envelope().id.clone();
        drop(abandoned);

        let mut recovered = next_entry(&mut entries).await;
        assert_eq!(recovered.envelope().id, id);
        assert_eq!(recovered.parse_payload::<u32>().unwrap(), 1);
        recovered.acknowledge().await.unwrap();
    }

    #[ignore]
    #[tokio::test]
    async fn archive_exhausted_tasks_and_forward_dead_letters() {
        let dead_letters = topic();
        let queue = task_queue(TaskQueueSettings {
            dead_letter_queue: Some(dead_letters.clone()),
            ..Default::default()
        })
        .await;
        let topic = topic();

        let options = PublishOptions {
            max_retries: Some(1),
            ..Default::default()
        };
        publish(&queue, &topic, 42, options).await;

        let mut entries = subscribe(&queue, &topic).await;
        let mut first = next_entry(&mut entries).await;
        assert_eq!(first.delivery_attempt(), 1);
        first
            .reject(BlackboxError::from_message("status 500"))
            .await
            .unwrap();

        let mut retried = next_entry(&mut entries).await;
        assert_eq!(retried.delivery_attempt(), 2);
        retried
            .reject(BlackboxError::from_message("status 500"))
            .await
            .unwrap();

        let archived = queue.archived(topic.key(), 10).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].retried, 1);
        assert_eq!(archived[0].payload, "42");
        assert_eq!(archived[0].last_error.as_deref(), Some("status 500"));

        let nothing = timeout(Duration::from_millis(100), entries.next()).await;
        assert!(nothing.is_err());

        let mut letters = subscribe(&queue, &dead_letters).await;
        let mut letter_entry = next_entry(&mut letters).await;
        let letter: DeadLetter = letter_entry.parse_payload().unwrap();
        letter_entry.acknowledge().await.unwrap();

        assert_eq!(letter.topic, topic.key());
        assert_eq!(letter.payload, "42");
        assert_eq!(letter.attempts, 2);
        assert_eq!(
            letter.attributes.get(ORIGINAL_TOPIC_ATTRIBUTE).map(String::as_str),
            Some(topic.key())
        );
    }

    #[test]
    fn derive_keys_per_topic_and_lane() {
        assert_eq!(
            pending_key("event.internal", Priority::Critical),
            "courier:tq:event.internal:critical"
        );
        assert_eq!(active_key("event.internal"), "courier:tq:event.internal:active");
        assert_eq!(
            archived_key("event.external"),
            "courier:tq:event.external:archived"
        );
        assert_eq!(unique_key("a", "x"), unique_key("a", "x"));
        assert_ne!(unique_key("a", "x"), unique_key("b", "x"));
    }

    #[test]
    fn build_envelopes_from_options() {
        let settings = TaskQueueSettings::default();
        let options = PublishOptions {
            max_retries: Some(3),
            retention: Some(Duration::from_secs(60)),
            priority: Priority::Low,
            ..Default::default()
        }
        .with_attribute("source", "billing");

        let envelope = TaskEnvelope::new("orders", "{}".into(), &options, &settings, None);

        assert_eq!(envelope.topic, "orders");
        assert_eq!(envelope.priority, Priority::Low);
        assert_eq!(envelope.max_retries, 3);
        assert_eq!(envelope.retried, 0);
        assert_eq!(envelope.retention_ms, Some(60_000));
        assert_eq!(envelope.lease_ms, millis(settings.lease));
        assert_eq!(envelope.attributes.get("source").map(String::as_str), Some("billing"));
    }

    #[test]
    fn fall_back_to_default_retry_budget() {
        let settings = TaskQueueSettings::default();
        let envelope = TaskEnvelope::new(
            "orders",
            "{}".into(),
            &PublishOptions::default(),
            &settings,
            None,
        );

        assert_eq!(envelope.max_retries, settings.default_max_retries);
        assert_eq!(envelope.priority, Priority::Default);
    }

    #[test]
    fn serialize_priority_for_the_lua_scripts() {
        let settings = TaskQueueSettings::default();
        let envelope = TaskEnvelope::new(
            "orders",
            "{}".into(),
            &PublishOptions::default(),
            &settings,
            None,
        );
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["priority"], "default");
        assert!(json["lease_ms"].is_i64());
    }
}
