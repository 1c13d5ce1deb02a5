use crate::domain::store::EventStore;
use crate::domain::ArchivedEvent;
use crate::harness::{BrokerPublisher, Service};
use crate::library::communication::event::{Consumer, DeadLetter};
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Persists dead letters of the event topics so the archive sweep can replay them
pub struct DeadLetterService {
    store: Arc<dyn EventStore>,
}

impl Service for DeadLetterService {
    const NAME: &'static str = "DeadLetterService";
    type Instance = DeadLetterService;
    type Config = Arc<dyn EventStore>;

    fn instantiate(_publisher: BrokerPublisher, store: &Self::Config) -> Self::Instance {
        Self {
            store: store.clone(),
        }
    }
}

#[async_trait]
impl Consumer for DeadLetterService {
    type Notification = DeadLetter;

    async fn consume(&self, letter: Self::Notification) -> EmptyResult {
        let record = match ArchivedEvent::from_dead_letter(&letter) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(topic = letter.topic.as_str(), "Discarding dead letter of foreign topic");
                return Ok(());
            }
            Err(e) => {
                warn!(topic = letter.topic.as_str(), "Discarding unreadable dead letter: {}", e);
                return Ok(());
            }
        };

        info!(
            id = record.id.as_str(),
            event = record.event_name.as_str(),
            attempts = letter.attempts,
            "Archiving undeliverable event: {}",
            record.reason
        );

        self.store.archive(record).await?;

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::store::MemoryEventStore;
    use crate::domain::{RequestPayload, Trigger};
    use crate::library::communication::event::Notification;
    use crate::library::communication::BlackboxError;
    use crate::module::options::BrokerConfig;
    use crate::module::BrokerContext;
    use serde_json::json;
    use std::collections::HashMap;

    fn service(store: Arc<dyn EventStore>) -> DeadLetterService {
        let context = BrokerContext::in_memory(BrokerConfig::in_memory()).unwrap();
        DeadLetterService::instantiate(context.publisher, &store)
    }

    #[tokio::test]
    async fn archive_failed_deliveries() {
        let store = Arc::new(MemoryEventStore::new());
        let request = RequestPayload::new(
            "order.created".into(),
            Trigger {
                base_url: "http://billing.local".into(),
                path: "/hook".into(),
                ..Default::default()
            },
            json!({ "id": 7 }),
            &HashMap::new(),
        );
        let letter = DeadLetter::new(
            RequestPayload::queue().key().to_owned(),
            HashMap::new(),
            &serde_json::to_vec(&request).unwrap(),
            BlackboxError::from_message("status 503"),
            6,
        );

        service(store.clone()).consume(letter).await.unwrap();

        let archived = store.fetch_all_archived().await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].event_name, "order.created");
        assert_eq!(archived[0].trigger, Some(request.trigger));
        assert_eq!(archived[0].reason, "status 503");
    }

    #[tokio::test]
    async fn discard_letters_of_foreign_topics() {
        let store = Arc::new(MemoryEventStore::new());
        let letter = DeadLetter::new(
            "billing.invoices".into(),
            HashMap::new(),
            b"{}",
            BlackboxError::from_message("boom"),
            1,
        );

        service(store.clone()).consume(letter).await.unwrap();

        assert!(store.fetch_all_archived().await.unwrap().is_empty());
    }
}
