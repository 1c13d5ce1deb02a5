//! Various small helper functions

mod backoff;

pub use backoff::*;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::ParseIntError;
use std::time::Duration;

/// Parses a Duration from a string containing seconds.
/// Useful for command line parsing
pub fn parse_seconds(src: &str) -> Result<Duration, ParseIntError> {
    let seconds = src.parse::<u64>()?;
    Ok(Duration::from_secs(seconds))
}

/// Parses a Duration from a string containing milliseconds
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}

/// Stable hex digest over a sequence of strings, used to detect duplicate work items
///
/// Not suitable for anything security related.
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = DefaultHasher::new();

    for part in parts {
        part.as_ref().hash(&mut hasher);
    }

    format!("{:016x}", hasher.finish())
}
