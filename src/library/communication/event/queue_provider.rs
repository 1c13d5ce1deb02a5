use super::super::super::BoxedError;
use super::{ConsumerGroupDescriptor, QueueDescriptor, QueueEntry};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Provider of streams of [`QueueEntries`](QueueEntry)
#[async_trait]
pub trait QueueProvider {
    /// Entry type emitted by the stream
    type Entry: QueueEntry + Send + Sync;

    /// Provisions whatever the backend needs for the queue and group and starts streaming entries.
    ///
    /// Ends the stream when no entry has been received within `idle_timeout`, or never if it is `None`.
    async fn consume(
        &self,
        queue: QueueDescriptor,
        group: &ConsumerGroupDescriptor,
        consumer: &str, // &ConsumerIdentifier
        batch_size: usize,
        idle_timeout: Option<Duration>,
    ) -> Result<BoxStream<'static, Result<Self::Entry, BoxedError>>, BoxedError>;
}
