//! Implementations of the communication traits for concrete backends

pub mod json;
pub mod pubsub;
pub mod redis;
