use super::QueueDescriptor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Message announcing that something happened which other components may act upon
pub trait Notification: Serialize + DeserializeOwned + PartialEq + Debug {
    /// Queue on which this implementation can be sent and received
    fn queue() -> QueueDescriptor;
}
