//! Exponential backoff implementations

use rand::Rng;
use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Each element is the previous one multiplied by `multiplier`, capped at `max`.
/// The iterator ends once `limit` elements have been produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    retries: u32,
    limit: u32,
    multiplier: u32,
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 2, Duration::from_secs(3600), 25)
    }
}

impl Backoff {
    /// Creates a new backoff starting at `base`
    pub fn new(base: Duration, multiplier: u32, max: Duration, limit: u32) -> Self {
        Self {
            retries: 0,
            limit,
            multiplier,
            base,
            max,
            current: base,
        }
    }

    /// Constant delay that never grows
    pub fn constant(delay: Duration) -> Self {
        Self::new(delay, 1, delay, u32::MAX)
    }

    /// Delay before the given retry (starting at 1), without consuming the iterator
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = self.multiplier.saturating_pow(exponent);

        self.base
            .checked_mul(factor)
            .map(|delay| delay.min(self.max))
            .unwrap_or(self.max)
    }

    /// Same as [`delay_for`](Self::delay_for) with up to 10% random jitter added
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let spread = (delay.as_millis() / 10) as u64;

        if spread == 0 {
            return delay;
        }

        delay + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.retries += 1;

        if self.retries > self.limit {
            None
        } else {
            let value = self.current;
            self.current = self
                .current
                .checked_mul(self.multiplier)
                .map(|next| next.min(self.max))
                .unwrap_or(self.max);
            Some(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_monotonically_increasing() {
        let mut backoff = Backoff::new(Duration::from_millis(25), 2, Duration::from_secs(600), 13);
        let mut previous = Duration::default();

        while let Some(duration) = backoff.next() {
            assert!(previous < duration);
            previous = duration;
        }
    }

    #[test]
    fn backoff_is_capped() {
        let backoff = Backoff::new(Duration::from_secs(5), 2, Duration::from_secs(60), 100);

        assert_eq!(backoff.delay_for(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(40), Duration::from_secs(60));
        assert_eq!(backoff.take(10).last(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn constant_backoff_never_grows() {
        let backoff = Backoff::constant(Duration::from_secs(5));

        assert_eq!(backoff.delay_for(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(7), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::constant(Duration::from_secs(5));

        for _ in 0..20 {
            let delay = backoff.jittered_delay_for(1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay < Duration::from_millis(5500));
        }
    }
}
