use super::super::pubsub::{PubSubClient, PubSubMessage, ReceivedMessage};
use super::{RedisFactory, RedisQueueError};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use redis::aio::{Connection, MultiplexedConnection};
use redis::streams::{
    StreamClaimOptions, StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply,
    StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const TOPICS_KEY: &str = "courier:ps:topics";
const SUBSCRIPTIONS_KEY: &str = "courier:ps:subscriptions";
const DEADLINES_KEY: &str = "courier:ps:deadlines";
const PAYLOAD_FIELD: &str = "payload";
const ATTRIBUTES_FIELD: &str = "attributes";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_NEW: &str = ">";

fn stream_key(topic: &str) -> String {
    format!("courier:ps:{}", topic)
}

fn millis(duration: Duration) -> usize {
    duration.as_millis().min(usize::MAX as u128) as usize
}

/// [`PubSubClient`] on top of [Redis Streams](https://redis.io/topics/streams-intro)
///
/// A topic maps to a stream and every subscription to a consumer group on it. Unacknowledged
/// entries stay in the pending entries list of the group and are reclaimed by the next pull once
/// they have been idle for longer than the ack deadline of the subscription.
pub struct RedisPubSubClient {
    factory: RedisFactory,
    consumer: String,
    stream_limit: usize,
    readers: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl RedisPubSubClient {
    /// Creates a new client, capping every topic stream at roughly `stream_limit` entries
    pub fn new(factory: RedisFactory, stream_limit: usize) -> Self {
        Self {
            factory,
            consumer: Uuid::new_v4().to_string(),
            stream_limit,
            readers: Mutex::new(HashMap::new()),
        }
    }

    async fn subscription(
        &self,
        con: &mut MultiplexedConnection,
        subscription: &str,
    ) -> Result<(String, Duration), BoxedError> {
        let topic: Option<String> = con.hget(SUBSCRIPTIONS_KEY, subscription).await?;
        let topic = topic.ok_or_else(|| RedisQueueError::UnknownSubscription(subscription.into()))?;
        let deadline: Option<u64> = con.hget(DEADLINES_KEY, subscription).await?;

        Ok((
            stream_key(&topic),
            Duration::from_millis(deadline.unwrap_or(60_000)),
        ))
    }

    /// Dedicated connection for blocking reads of a subscription
    async fn reader(&self, subscription: &str) -> Result<Arc<Mutex<Connection>>, BoxedError> {
        let mut readers = self.readers.lock().await;

        if let Some(reader) = readers.get(subscription) {
            return Ok(reader.clone());
        }

        let reader = Arc::new(Mutex::new(self.factory.owned().await?));
        readers.insert(subscription.to_owned(), reader.clone());
        Ok(reader)
    }
}

fn into_message(entry: StreamId, delivery_attempt: u32) -> Result<ReceivedMessage, BoxedError> {
    let data: Vec<u8> = entry
        .get(PAYLOAD_FIELD)
        .ok_or(RedisQueueError::MissingPayload)?;

    let attributes = match entry.get::<String>(ATTRIBUTES_FIELD) {
        Some(raw) => serde_json::from_str(&raw)?,
        None => HashMap::new(),
    };

    Ok(ReceivedMessage {
        ack_id: entry.id,
        message: PubSubMessage { data, attributes },
        delivery_attempt,
    })
}

#[async_trait]
impl PubSubClient for RedisPubSubClient {
    async fn topic_exists(&self, topic: &str) -> Result<bool, BoxedError> {
        let mut con = self.factory.shared();
        Ok(con.sismember(TOPICS_KEY, topic).await?)
    }

    async fn create_topic(&self, topic: &str) -> EmptyResult {
        let mut con = self.factory.shared();
        let _: () = con.sadd(TOPICS_KEY, topic).await?;
        Ok(())
    }

    async fn subscription_exists(&self, subscription: &str) -> Result<bool, BoxedError> {
        let mut con = self.factory.shared();
        Ok(con.hexists(SUBSCRIPTIONS_KEY, subscription).await?)
    }

    async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> EmptyResult {
        let mut con = self.factory.shared();

        // Fails with BUSYGROUP if another instance won the race, which is fine
        con.xgroup_create_mkstream::<_, _, _, ()>(stream_key(topic), subscription, STREAM_ID_TAIL)
            .await
            .ok();

        redis::pipe()
            .atomic()
            .hset(SUBSCRIPTIONS_KEY, subscription, topic)
            .ignore()
            .hset(DEADLINES_KEY, subscription, millis(ack_deadline))
            .ignore()
            .query_async::<_, ()>(&mut con)
            .await?;

        Ok(())
    }

    async fn publish(&self, topic: &str, message: PubSubMessage) -> Result<String, BoxedError> {
        let mut con = self.factory.shared();
        let attributes = serde_json::to_vec(&message.attributes)?;

        let id: String = con
            .xadd_maxlen(
                stream_key(topic),
                StreamMaxlen::Approx(self.stream_limit),
                "*",
                &[
                    (PAYLOAD_FIELD, message.data.as_slice()),
                    (ATTRIBUTES_FIELD, attributes.as_slice()),
                ],
            )
            .await?;

        Ok(id)
    }

    /// Reclaims entries whose ack deadline passed before reading new ones
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BoxedError> {
        let mut con = self.factory.shared();
        let (stream, ack_deadline) = self.subscription(&mut con, subscription).await?;
        let max_messages = max_messages.max(1);
        let mut received = Vec::new();

        let pending: StreamPendingCountReply = con
            .xpending_count(&stream, subscription, "-", "+", max_messages)
            .await?;

        let expired: HashMap<String, usize> = pending
            .ids
            .into_iter()
            .filter(|entry| entry.last_delivered_ms >= millis(ack_deadline))
            .map(|entry| (entry.id, entry.times_delivered))
            .collect();

        if !expired.is_empty() {
            let ids: Vec<&String> = expired.keys().collect();
            let claimed: StreamClaimReply = con
                .xclaim(&stream, subscription, &self.consumer, millis(ack_deadline), &ids[..])
                .await?;

            for entry in claimed.ids {
                let attempt = expired.get(&entry.id).copied().unwrap_or_default() + 1;
                received.push(into_message(entry, attempt as u32)?);
            }
        }

        if received.len() >= max_messages {
            return Ok(received);
        }

        let mut options = StreamReadOptions::default()
            .group(subscription, &self.consumer)
            .count(max_messages - received.len());

        // BLOCK 0 would wait forever
        if received.is_empty() && millis(wait) > 0 {
            options = options.block(millis(wait));
        }

        let reader = self.reader(subscription).await?;
        let mut reader = reader.lock().await;
        let reply: StreamReadReply = reader
            .xread_options(&[&stream], &[STREAM_ID_NEW], &options)
            .await?;

        for key in reply.keys {
            for entry in key.ids {
                received.push(into_message(entry, 1)?);
            }
        }

        Ok(received)
    }

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> EmptyResult {
        let mut con = self.factory.shared();
        let (stream, _) = self.subscription(&mut con, subscription).await?;

        con.xack::<_, _, _, ()>(&stream, subscription, &[ack_id])
            .await?;

        Ok(())
    }

    /// Claiming an entry resets its idle time which is what the deadline is measured against.
    /// A zero deadline backdates the idle time so the next pull reclaims it.
    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_id: &str,
        deadline: Duration,
    ) -> EmptyResult {
        let mut con = self.factory.shared();
        let (stream, ack_deadline) = self.subscription(&mut con, subscription).await?;

        let options = if deadline == Duration::ZERO {
            StreamClaimOptions::default()
                .idle(millis(ack_deadline))
                .with_justid()
        } else {
            let idle = ack_deadline.saturating_sub(deadline);
            StreamClaimOptions::default().idle(millis(idle)).with_justid()
        };

        let _: redis::Value = con
            .xclaim_options(&stream, subscription, &self.consumer, 0, &[ack_id], options)
            .await?;

        Ok(())
    }
}
