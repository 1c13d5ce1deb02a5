use super::{super::super::EmptyResult, Notification, PublishOptions, QueueDescriptor};
use async_trait::async_trait;

/// Structure which allows publishing of serialized data into a queue
#[async_trait]
pub trait RawNotificationPublisher {
    /// Sends an opaque payload to a [`Queue`](QueueDescriptor) using the given [`PublishOptions`]
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: QueueDescriptor,
        options: &PublishOptions,
    ) -> EmptyResult;
}

/// Publisher for [`Notifications`](Notification)
#[async_trait]
pub trait NotificationPublisher {
    /// Publishes a [`Notification`] to its designated queue with default options
    async fn publish<N: Notification + Send + Sync>(&self, notification: &N) -> EmptyResult;

    /// Publishes a [`Notification`] to its designated queue with explicit [`PublishOptions`]
    async fn publish_with_options<N: Notification + Send + Sync>(
        &self,
        notification: &N,
        options: &PublishOptions,
    ) -> EmptyResult;
}
