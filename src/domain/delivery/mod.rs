//! HTTP delivery of events to their triggers

mod fanout;
mod notifier;
#[cfg(test)]
pub(crate) mod receiver;

pub use fanout::*;
pub use notifier::*;

use std::time::Duration;
use thiserror::Error;

/// Which response codes count as a successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessCriterion {
    /// Only `200 OK`
    OkOnly,
    /// Any `2xx` code
    AnySuccess,
}

impl SuccessCriterion {
    /// Whether a response with the given status is a success
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            Self::OkOnly => status == 200,
            Self::AnySuccess => (200..300).contains(&status),
        }
    }
}

/// Delivery to a single trigger failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Destination answered with a status outside the success range
    #[error("destination responded with status {status}")]
    Status {
        /// Response status code
        status: u16,
    },
    /// Connection could not be established or broke down
    #[error("transport failed: {0}")]
    Transport(String),
    /// No response within the timeout
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// Url or headers can not be turned into a request
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    /// Delivery did not finish before the fan-out gave up on it
    #[error("delivery aborted before completion")]
    Aborted,
}
