use super::{EventState, InternalPayload, RequestPayload, Trigger, TriggerIdentity};
use crate::library::communication::event::{DeadLetter, Notification, QueueDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

const DEAD_LETTER_QUEUE_KEY: &str = "event.deadletter";
const DEAD_LETTER_QUEUE_SIZE: usize = 10_000;

impl Notification for DeadLetter {
    fn queue() -> QueueDescriptor {
        QueueDescriptor::new(DEAD_LETTER_QUEUE_KEY.into(), DEAD_LETTER_QUEUE_SIZE)
    }
}

fn archived_state() -> EventState {
    EventState::Archived
}

/// Undeliverable event persisted for later replay by the sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedEvent {
    /// Record identifier
    pub id: String,
    /// Name of the event
    pub event_name: String,
    /// Always [`EventState::Archived`]
    #[serde(default = "archived_state")]
    pub state: EventState,
    /// Topic the message failed on
    pub topic: String,
    /// Attributes of the failed message
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Event data
    pub data: Value,
    /// Payload headers to send with the replay
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Single destination of a failed delivery, `None` if the whole event failed to dispatch
    #[serde(default)]
    pub trigger: Option<Trigger>,
    /// Destinations that have been reached by a replay already
    #[serde(default)]
    pub delivered: Vec<TriggerIdentity>,
    /// Error chain of the last failure
    #[serde(default)]
    pub reason: String,
    /// Moment the record was archived
    pub archived_at: DateTime<Utc>,
}

impl ArchivedEvent {
    /// Converts a dead letter of one of the event topics into an archive record.
    ///
    /// Returns `None` for letters of other topics.
    pub fn from_dead_letter(letter: &DeadLetter) -> Result<Option<Self>, serde_json::Error> {
        let (event_name, data, headers, trigger) = if letter.topic == InternalPayload::queue().key() {
            let payload: InternalPayload = serde_json::from_str(&letter.payload)?;
            (
                payload.event_name,
                payload.data.unwrap_or(Value::Null),
                payload.metadata.headers,
                None,
            )
        } else if letter.topic == RequestPayload::queue().key() {
            let payload: RequestPayload = serde_json::from_str(&letter.payload)?;
            (
                payload.event_name,
                payload.data,
                payload.headers,
                Some(payload.trigger),
            )
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            id: Uuid::new_v4().to_string(),
            event_name,
            state: EventState::Archived,
            topic: letter.topic.clone(),
            attributes: letter.attributes.clone(),
            data,
            headers,
            trigger,
            delivered: Vec::new(),
            reason: letter.reason.summary(),
            archived_at: letter.failed_at,
        }))
    }

    /// Whether a destination has already been reached
    pub fn is_delivered(&self, identity: &TriggerIdentity) -> bool {
        self.delivered.contains(identity)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::BlackboxError;
    use serde_json::json;

    fn letter(topic: &str, payload: String) -> DeadLetter {
        DeadLetter::new(
            topic.into(),
            HashMap::new(),
            payload.as_bytes(),
            BlackboxError::from_message("status 503"),
            6,
        )
    }

    #[test]
    fn archive_failed_dispatches() {
        let payload = InternalPayload {
            event_name: "order.created".into(),
            data: Some(json!({"id": 7})),
            ..Default::default()
        };
        let letter = letter("event.internal", serde_json::to_string(&payload).unwrap());

        let record = ArchivedEvent::from_dead_letter(&letter).unwrap().unwrap();

        assert_eq!(record.event_name, "order.created");
        assert_eq!(record.data, json!({"id": 7}));
        assert_eq!(record.trigger, None);
        assert_eq!(record.state, EventState::Archived);
        assert_eq!(record.reason, "status 503");
    }

    #[test]
    fn archive_failed_deliveries_with_their_trigger() {
        let trigger = Trigger {
            base_url: "http://a.local".into(),
            ..Default::default()
        };
        let payload = RequestPayload::new("order.created".into(), trigger.clone(), json!(1), &HashMap::new());
        let letter = letter("event.external", serde_json::to_string(&payload).unwrap());

        let record = ArchivedEvent::from_dead_letter(&letter).unwrap().unwrap();

        assert_eq!(record.trigger, Some(trigger));
        assert!(!record.is_delivered(&record.trigger.as_ref().unwrap().identity()));
    }

    #[test]
    fn ignore_foreign_topics() {
        let letter = letter("billing.invoice", "{}".into());
        assert_eq!(ArchivedEvent::from_dead_letter(&letter).unwrap(), None);
    }
}
