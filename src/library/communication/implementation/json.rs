//! Serialization and deserialization provided by [`serde_json`] using marker traits
//!
//! Implementors of the raw, byte oriented traits gain the strongly typed higher-level traits
//! by implementing the marker traits in this module. Swapping the wire format later on only
//! requires changing the marker traits.

use super::super::event::{
    Notification, NotificationPublisher, PublishOptions, QueueEntry, RawNotificationPublisher,
    RawQueueEntry,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use serde::Deserialize;

/// Marker trait providing a default [`NotificationPublisher`] implementation based on [`serde_json`]
pub trait JsonNotificationPublisher: RawNotificationPublisher + Send + Sync {}

#[async_trait]
impl<P> NotificationPublisher for P
where
    P: JsonNotificationPublisher,
{
    /// Serializes the notification using [`serde_json::to_string`]
    async fn publish<N: Notification + Send + Sync>(&self, notification: &N) -> EmptyResult {
        self.publish_with_options(notification, &PublishOptions::default())
            .await
    }

    /// Serializes the notification using [`serde_json::to_string`]
    async fn publish_with_options<N: Notification + Send + Sync>(
        &self,
        notification: &N,
        options: &PublishOptions,
    ) -> EmptyResult {
        let data = serde_json::to_string(notification)?;
        self.publish_raw(data.as_bytes(), N::queue(), options).await
    }
}

/// Marker trait providing a default [`QueueEntry`] implementation based on [`serde_json`]
pub trait JsonQueueEntry: RawQueueEntry {}

impl<E> QueueEntry for E
where
    E: JsonQueueEntry,
{
    /// Parses the payload using [`serde_json::from_slice`]
    fn parse_payload<'a, T>(&'a self) -> Result<T, BoxedError>
    where
        T: Deserialize<'a>,
    {
        serde_json::from_slice(self.payload()).map_err(Into::into)
    }
}

impl JsonQueueEntry for super::super::event::BoxedQueueEntry {}

impl<P> JsonNotificationPublisher for super::super::event::ObservedPublisher<P> where
    P: RawNotificationPublisher + Send + Sync
{
}
