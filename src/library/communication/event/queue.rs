use super::super::BlackboxError;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

/// Describes a notification queue and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    key: String,
    limit: usize,
}

impl QueueDescriptor {
    /// Creates a new instance from raw parts
    pub fn new(key: String, limit: usize) -> Self {
        Self { key, limit }
    }

    /// Value which is used by backends to identify a queue (the topic name)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Maximum number of notifications to be retained in the queue, if the backend supports it
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Entry retrieved from a [`Queue`](QueueDescriptor) providing a raw payload
#[async_trait]
pub trait RawQueueEntry {
    /// Payload of the item
    fn payload(&self) -> &[u8];

    /// Key/value attributes that travelled alongside the payload
    fn attributes(&self) -> &HashMap<String, String>;

    /// How often this entry has been handed out, starting at 1
    fn delivery_attempt(&self) -> u32;

    /// Acknowledge the item as processed
    async fn acknowledge(&mut self) -> EmptyResult;

    /// Report the item as failed, handing it back to the retry pipeline of the backend
    async fn reject(&mut self, reason: BlackboxError) -> EmptyResult;
}

/// Useful functions for [`QueueEntry`] implementations with default implementations
pub trait QueueEntry: RawQueueEntry {
    /// Attempts to parse the wire-format payload into a given data structure
    fn parse_payload<'a, T>(&'a self) -> Result<T, BoxedError>
    where
        T: Deserialize<'a>;
}

/// Backend agnostic queue entry
pub type BoxedQueueEntry = Box<dyn RawQueueEntry + Send + Sync>;

#[async_trait]
impl RawQueueEntry for BoxedQueueEntry {
    fn payload(&self) -> &[u8] {
        (**self).payload()
    }

    fn attributes(&self) -> &HashMap<String, String> {
        (**self).attributes()
    }

    fn delivery_attempt(&self) -> u32 {
        (**self).delivery_attempt()
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        (**self).acknowledge().await
    }

    async fn reject(&mut self, reason: BlackboxError) -> EmptyResult {
        (**self).reject(reason).await
    }
}
