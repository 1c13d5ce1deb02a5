//! This library crate contains everything needed to run and operate a courier event broker.
//!
//! Submodules have been introduced to split responsibilities. Each module has a specific focus
//! and together they form a chain of dependencies from the low-level [`library`], over the broker [`domain`]
//! specific logic, through the executable [`harness`], up to the high-level [`modules`](module) and the services they contain.

#![warn(missing_docs)]

pub mod domain;
pub mod harness;
pub mod library;
pub mod module;
