use crate::domain::registry::EventRegistry;
use crate::domain::store::EventStore;
use crate::harness::Periodic;
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Replaces the active registry snapshot with the definitions currently in the store
///
/// A failed fetch leaves the previous snapshot in place, the [`PeriodicJob`](crate::harness::PeriodicJob)
/// logs the error and retries on the next tick.
pub struct RegistryRefresh {
    registry: Arc<EventRegistry>,
    store: Arc<dyn EventStore>,
}

impl RegistryRefresh {
    /// Creates a new instance from raw parts
    pub fn new(registry: Arc<EventRegistry>, store: Arc<dyn EventStore>) -> Self {
        Self { registry, store }
    }
}

#[async_trait]
impl Periodic for RegistryRefresh {
    const NAME: &'static str = "RegistryRefresh";

    async fn tick(&self) -> EmptyResult {
        let events = self.store.fetch_all().await?;
        let count = events.len();
        let generation = self.registry.refresh(events);

        debug!(generation, events = count, "Refreshed event registry");

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::store::{EventFilter, EventPatch, MemoryEventStore};
    use crate::domain::{ArchivedEvent, Event, StoreError, TriggerIdentity};
    use crate::harness::PeriodicJob;
    use std::time::Duration;

    struct Unavailable;

    #[async_trait]
    impl EventStore for Unavailable {
        async fn fetch_all(&self) -> Result<Vec<Event>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn fetch_all_archived(&self) -> Result<Vec<ArchivedEvent>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }

        async fn find(&self, _name: &str) -> Result<Option<Event>, StoreError> {
            Ok(None)
        }

        async fn list(&self, _filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
            Ok(Vec::new())
        }

        async fn register(&self, event: Event) -> Result<Event, StoreError> {
            Ok(event)
        }

        async fn update(&self, _id: &str, _patch: EventPatch) -> Result<Option<Event>, StoreError> {
            Ok(None)
        }

        async fn archive(&self, _record: ArchivedEvent) -> Result<(), StoreError> {
            Ok(())
        }

        async fn mark_delivered(&self, _id: &str, _identity: &TriggerIdentity) -> Result<(), StoreError> {
            Ok(())
        }

        async fn remove_archived(&self, _id: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn event(name: &str) -> Event {
        Event {
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn replace_the_snapshot_with_stored_definitions() {
        let registry = Arc::new(EventRegistry::new());
        registry.refresh(vec![event("stale")]);

        let store = Arc::new(MemoryEventStore::new());
        store.register(event("order.created")).await.unwrap();

        let job = PeriodicJob::new(
            RegistryRefresh::new(registry.clone(), store),
            Duration::from_secs(60),
        );
        assert!(job.supervised_tick().await);

        assert!(registry.get_event("order.created").is_ok());
        assert!(registry.get_event("stale").is_err());
    }

    #[tokio::test]
    async fn keep_the_snapshot_when_the_store_fails() {
        let registry = Arc::new(EventRegistry::new());
        registry.refresh(vec![event("order.created")]);
        let generation = registry.snapshot().generation();

        let job = PeriodicJob::new(
            RegistryRefresh::new(registry.clone(), Arc::new(Unavailable)),
            Duration::from_secs(60),
        );
        assert!(!job.supervised_tick().await);

        assert_eq!(registry.snapshot().generation(), generation);
        assert!(registry.get_event("order.created").is_ok());
    }
}
