//! Structures to realise an event-driven broker architecture
//!
//! Producers publish a [`Notification`] to its [`Queue`](QueueDescriptor) without knowing
//! who will process it. The [`PublishOptions`] accompanying each publish carry the delivery
//! parameters (retry budget, retention, uniqueness, delay) and the [`QueueClass`] selecting
//! the backend.
//!
//! Notifications are consumed by groups of consumers ([`ConsumerGroupDescriptor`]). Each
//! entry is handed to exactly one consumer of a group and has to be either acknowledged or
//! rejected. Rejected entries are retried by the backend according to a [`RetryPolicy`] and,
//! once the retry budget is exhausted, archived and forwarded as a [`DeadLetter`].
//!
//! Every publish and consume is reported as a [`Transition`] to a [`TransitionObserver`] which
//! powers the insights aggregation.

mod consumer;
mod consumer_group;
mod dead_letter;
mod error;
mod notification;
mod observer;
mod options;
mod publisher;
mod queue;
mod queue_provider;
mod retry;

pub use consumer::*;
pub use consumer_group::*;
pub use dead_letter::*;
pub use error::*;
pub use notification::*;
pub use observer::*;
pub use options::*;
pub use publisher::*;
pub use queue::*;
pub use queue_provider::*;
pub use retry::*;
