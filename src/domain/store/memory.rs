use super::{EventFilter, EventPatch, EventStore};
use crate::domain::{ArchivedEvent, Event, StoreError, TriggerIdentity};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Volatile [`EventStore`] for single process deployments and tests
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
    archived: RwLock<Vec<ArchivedEvent>>,
}

impl MemoryEventStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_identity(a: &Event, b: &Event) -> bool {
    a.name == b.name && a.service_name == b.service_name && a.kind == b.kind && a.state == b.state
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn fetch_all(&self) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| e.is_active()).cloned().collect())
    }

    async fn fetch_all_archived(&self) -> Result<Vec<ArchivedEvent>, StoreError> {
        Ok(self.archived.read().await.clone())
    }

    async fn find(&self, name: &str) -> Result<Option<Event>, StoreError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .find(|e| e.is_active() && e.name == name)
            .cloned())
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().await;
        let mut matching: Vec<Event> = events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(matching
            .into_iter()
            .skip(filter.skip() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn register(&self, mut event: Event) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;

        match events.iter_mut().find(|e| same_identity(e, &event)) {
            Some(existing) => {
                event.id = existing.id.clone();
                *existing = event.clone();
            }
            None => {
                if event.id.is_empty() {
                    event.id = Uuid::new_v4().to_string();
                }
                events.push(event.clone());
            }
        }

        Ok(event)
    }

    async fn update(&self, id: &str, patch: EventPatch) -> Result<Option<Event>, StoreError> {
        let mut events = self.events.write().await;

        Ok(events.iter_mut().find(|e| e.id == id).map(|event| {
            patch.apply(event);
            event.clone()
        }))
    }

    async fn archive(&self, record: ArchivedEvent) -> Result<(), StoreError> {
        let mut archived = self.archived.write().await;

        if !archived.iter().any(|r| r.id == record.id) {
            archived.push(record);
        }

        Ok(())
    }

    async fn mark_delivered(&self, id: &str, identity: &TriggerIdentity) -> Result<(), StoreError> {
        let mut archived = self.archived.write().await;

        if let Some(record) = archived.iter_mut().find(|r| r.id == id) {
            if !record.is_delivered(identity) {
                record.delivered.push(identity.clone());
            }
        }

        Ok(())
    }

    async fn remove_archived(&self, id: &str) -> Result<(), StoreError> {
        self.archived.write().await.retain(|r| r.id != id);
        Ok(())
    }
}
