//! Domain specific structures, implementations, and logic

/// Default queue size for all event topics
///
/// Only honored by backends with capped topics. It should comfortably hold a burst of
/// events that arrives while all workers are busy.
pub(self) const QUEUE_SIZE_EVENTS: usize = 100_000;

mod archive;
mod error;
mod event;
mod payload;

pub mod delivery;
pub mod insights;
pub mod metrics;
pub mod registry;
pub mod store;

pub use archive::*;
pub use error::*;
pub use event::*;
pub use payload::*;
