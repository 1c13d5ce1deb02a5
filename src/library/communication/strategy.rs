use super::event::{
    BoxedQueueEntry, ConsumerGroupDescriptor, PublishOptions, QueueClass, QueueDescriptor,
    QueueError, QueueProvider, RawNotificationPublisher,
};
use super::implementation::json::JsonNotificationPublisher;
use super::implementation::pubsub::PubSubQueue;
use super::implementation::redis::TaskQueue;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

/// Routes notifications to the backend selected by their [`QueueClass`]
///
/// A class without a configured backend is rejected synchronously with
/// [`QueueError::ClassNotEnabled`] instead of being silently dropped.
#[derive(Clone, Default)]
pub struct QueueStrategy {
    task_queue: Option<TaskQueue>,
    pubsub: Option<PubSubQueue>,
}

impl QueueStrategy {
    /// Creates a strategy without any backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the [`QueueClass::TaskQueue`] backend
    pub fn with_task_queue(mut self, queue: TaskQueue) -> Self {
        self.task_queue = Some(queue);
        self
    }

    /// Enables the [`QueueClass::PubSub`] backend
    pub fn with_pubsub(mut self, queue: PubSubQueue) -> Self {
        self.pubsub = Some(queue);
        self
    }

    /// Classes that have a backend
    pub fn enabled(&self) -> Vec<QueueClass> {
        let mut classes = Vec::new();

        if self.task_queue.is_some() {
            classes.push(QueueClass::TaskQueue);
        }

        if self.pubsub.is_some() {
            classes.push(QueueClass::PubSub);
        }

        classes
    }

    /// Task queue backend, used for inspecting archived tasks
    pub fn task_queue(&self) -> Result<&TaskQueue, QueueError> {
        self.task_queue
            .as_ref()
            .ok_or(QueueError::ClassNotEnabled(QueueClass::TaskQueue))
    }

    /// Consumption side of the backend for a class
    pub fn provider(&self, class: QueueClass) -> Result<ClassifiedProvider, QueueError> {
        let provider = match class {
            QueueClass::TaskQueue => self
                .task_queue
                .clone()
                .map(ClassifiedProvider::TaskQueue),
            QueueClass::PubSub => self.pubsub.clone().map(ClassifiedProvider::PubSub),
        };

        provider.ok_or(QueueError::ClassNotEnabled(class))
    }
}

#[async_trait]
impl RawNotificationPublisher for QueueStrategy {
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: QueueDescriptor,
        options: &PublishOptions,
    ) -> EmptyResult {
        match options.class {
            QueueClass::TaskQueue => {
                self.task_queue()?
                    .publish_raw(data, descriptor, options)
                    .await
            }
            QueueClass::PubSub => match &self.pubsub {
                Some(queue) => queue.publish_raw(data, descriptor, options).await,
                None => Err(QueueError::ClassNotEnabled(QueueClass::PubSub).into()),
            },
        }
    }
}

impl JsonNotificationPublisher for QueueStrategy {}

/// Consumption side of one backend, emitting backend agnostic entries
#[derive(Clone)]
pub enum ClassifiedProvider {
    /// [`QueueClass::TaskQueue`]
    TaskQueue(TaskQueue),
    /// [`QueueClass::PubSub`]
    PubSub(PubSubQueue),
}

impl ClassifiedProvider {
    /// Class of the wrapped backend
    pub fn class(&self) -> QueueClass {
        match self {
            Self::TaskQueue(_) => QueueClass::TaskQueue,
            Self::PubSub(_) => QueueClass::PubSub,
        }
    }
}

#[async_trait]
impl QueueProvider for ClassifiedProvider {
    type Entry = BoxedQueueEntry;

    async fn consume(
        &self,
        queue: QueueDescriptor,
        group: &ConsumerGroupDescriptor,
        consumer: &str, // &ConsumerIdentifier
        batch_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Result<BoxStream<'static, Result<Self::Entry, BoxedError>>, BoxedError> {
        let stream = match self {
            Self::TaskQueue(provider) => provider
                .consume(queue, group, consumer, batch_size, idle_timeout)
                .await?
                .map_ok(|entry| Box::new(entry) as BoxedQueueEntry)
                .boxed(),
            Self::PubSub(provider) => provider
                .consume(queue, group, consumer, batch_size, idle_timeout)
                .await?
                .map_ok(|entry| Box::new(entry) as BoxedQueueEntry)
                .boxed(),
        };

        Ok(stream)
    }
}
