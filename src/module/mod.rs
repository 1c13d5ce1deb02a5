//! Runnable units of the broker
//!
//! Each module is started by the [`ModuleRunner`](crate::harness::ModuleRunner) and owns the
//! jobs it schedules. Modules share their options and the [`BrokerContext`].

pub mod api;
pub mod options;
pub mod standalone;
pub mod worker;

mod context;
mod refresh;

pub use context::*;
pub use refresh::RegistryRefresh;
