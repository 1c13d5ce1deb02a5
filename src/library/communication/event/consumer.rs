use super::super::super::EmptyResult;
use super::super::BlackboxError;
use super::{ConsumerGroupDescriptor, Notification, Transition, TransitionObserver};
use super::{QueueEntry, QueueProvider, RawQueueEntry};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::any::type_name;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_IDLE_TIMEOUT: Option<Duration> = None;

/// Entity which may consume and process [`Notifications`](Notification)
#[async_trait]
pub trait Consumer {
    /// Notification to consume
    type Notification: Notification;

    /// Processes an event notification and returns whether it succeeded or failed
    async fn consume(&self, notification: Self::Notification) -> EmptyResult;
}

/// Helper functions to aid the consumption of messages
#[async_trait]
pub trait ConsumerExt {
    /// Consumes notifications from a queue using the given provider, acknowledges those
    /// that have been processed successfully and rejects the rest.
    ///
    /// At most `concurrency` notifications are processed at the same time.
    async fn consume_queue<Q>(
        &self,
        provider: Q,
        group: &ConsumerGroupDescriptor,
        consumer: &str, // &ConsumerIdentifier
        concurrency: usize,
        observer: &dyn TransitionObserver,
    ) -> EmptyResult
    where
        Q: QueueProvider + Send + Sync;
}

#[async_trait]
impl<C> ConsumerExt for C
where
    C: Consumer + Send + Sync,
    C::Notification: DeserializeOwned + Send + Sync,
{
    async fn consume_queue<Q>(
        &self,
        provider: Q,
        group: &ConsumerGroupDescriptor,
        consumer: &str, // &ConsumerIdentifier
        concurrency: usize,
        observer: &dyn TransitionObserver,
    ) -> EmptyResult
    where
        Q: QueueProvider + Send + Sync,
    {
        let queue = C::Notification::queue();
        let topic = queue.key().to_owned();
        let group_name = group.identifier().to_string();

        let stream = provider
            .consume(
                queue,
                group,
                consumer,
                DEFAULT_BATCH_SIZE.max(concurrency),
                DEFAULT_IDLE_TIMEOUT,
            )
            .await?;

        let topic = &topic;
        let group_name = &group_name;

        stream
            .for_each_concurrent(Some(concurrency.max(1)), |item| async move {
                let mut entry = match item {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(
                            "Failed to receive notification {}: {}",
                            type_name::<C::Notification>(),
                            e
                        );
                        return;
                    }
                };

                let started = Utc::now();
                let outcome = match entry.parse_payload::<C::Notification>() {
                    Ok(notification) => self.consume(notification).await,
                    Err(e) => Err(e),
                };

                observer.observe(Transition {
                    topic: topic.clone(),
                    consumer: Some(group_name.clone()),
                    started,
                    ended: Utc::now(),
                    success: outcome.is_ok(),
                });

                match outcome {
                    Ok(_) => {
                        if let Err(e) = entry.acknowledge().await {
                            warn!(
                                "Failed to acknowledge {}: {}",
                                type_name::<C::Notification>(),
                                e
                            )
                        }
                    }
                    Err(e) => {
                        debug!(
                            attempt = entry.delivery_attempt(),
                            "Failed to consume {}: {}",
                            type_name::<C::Notification>(),
                            e
                        );

                        if let Err(e) = entry.reject(BlackboxError::from_boxed(e)).await {
                            warn!(
                                "Failed to reject {}: {}",
                                type_name::<C::Notification>(),
                                e
                            )
                        }
                    }
                }
            })
            .await;

        Ok(())
    }
}
