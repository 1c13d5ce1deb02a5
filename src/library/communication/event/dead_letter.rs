use super::super::BlackboxError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message whose retry budget has been exhausted, forwarded to the dead-letter topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Topic the message was originally published to
    pub topic: String,
    /// Attributes of the final delivery attempt
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Original serialized payload
    pub payload: String,
    /// Error chain of the last failed attempt
    pub reason: BlackboxError,
    /// Total number of processing attempts
    pub attempts: u32,
    /// Moment the message was given up on
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Creates a dead letter for a raw payload
    pub fn new(
        topic: String,
        attributes: HashMap<String, String>,
        payload: &[u8],
        reason: BlackboxError,
        attempts: u32,
    ) -> Self {
        Self {
            topic,
            attributes,
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason,
            attempts,
            failed_at: Utc::now(),
        }
    }
}
