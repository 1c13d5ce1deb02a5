//! Runtime harness to execute services in the context of modules

mod heart;
mod module;
mod periodic;
mod service;

pub use heart::*;
pub use module::*;
pub use periodic::*;
pub use service::*;
