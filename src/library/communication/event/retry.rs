use crate::library::helpers::Backoff;
use std::time::Duration;

/// Attribute carrying how often a message has been retried so far
pub const RETRY_COUNT_ATTRIBUTE: &str = "courier-retry-count";
/// Attribute carrying the retry budget of a message
pub const MAX_RETRIES_ATTRIBUTE: &str = "courier-max-retries";
/// Attribute carrying the topic a dead letter originated from
pub const ORIGINAL_TOPIC_ATTRIBUTE: &str = "courier-original-topic";

/// Outcome of a failed processing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-deliver the message after `delay` as retry number `attempt`
    Retry {
        /// Retry number, starting at 1
        attempt: u32,
        /// Time to wait before the message becomes visible again
        delay: Duration,
    },
    /// Retry budget is exhausted, archive the message and forward it as a dead letter
    Archive,
}

/// Decides what happens to a rejected message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Backoff,
    jitter: bool,
}

impl RetryPolicy {
    /// Retries after a constant delay
    pub fn fixed(delay: Duration) -> Self {
        Self {
            backoff: Backoff::constant(delay),
            jitter: false,
        }
    }

    /// Retries with an exponentially growing, jittered delay
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::new(base, 2, max, u32::MAX),
            jitter: true,
        }
    }

    /// `retried` is the number of retries that already happened for the message
    pub fn decide(&self, retried: u32, max_retries: u32) -> RetryDecision {
        if retried >= max_retries {
            return RetryDecision::Archive;
        }

        let attempt = retried + 1;
        let delay = if self.jitter {
            self.backoff.jittered_delay_for(attempt)
        } else {
            self.backoff.delay_for(attempt)
        };

        RetryDecision::Retry { attempt, delay }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}
