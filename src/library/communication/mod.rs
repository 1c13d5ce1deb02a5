//! Structures for asynchronous, queue based communication between components
//!
//! Producers hand serialized notifications to a [`RawNotificationPublisher`](event::RawNotificationPublisher)
//! together with [`PublishOptions`](event::PublishOptions). The options carry a [`QueueClass`](event::QueueClass)
//! which the [`QueueStrategy`] uses to route the notification to one of the configured backends.
//! Consumers on the other side of a backend obtain a stream of entries from a
//! [`QueueProvider`](event::QueueProvider) and either acknowledge or reject each one.

mod error;
pub mod event;
pub mod implementation;
mod strategy;

pub use error::*;
pub use strategy::*;
