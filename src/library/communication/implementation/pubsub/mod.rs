//! Publish-subscribe backend built on topics and subscriptions
//!
//! The [`PubSubQueue`] adapter implements the communication traits on top of any [`PubSubClient`].
//! It lazily provisions topics and subscriptions, bounds the number and size of messages held
//! at once, keeps ack deadlines of in-flight messages alive and runs the retry and dead-letter
//! pipeline for rejected messages.

mod client;
mod memory;
mod queue;

pub use client::*;
pub use memory::*;
pub use queue::*;
