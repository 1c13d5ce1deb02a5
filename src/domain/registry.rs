//! In-memory snapshots of the event definitions and the archive
//!
//! Both snapshots are immutable and replaced wholesale by a single writer. Readers clone an
//! [`Arc`] to the current generation and never observe a mix of two refreshes.

use super::store::EventStore;
use super::{ArchivedEvent, Event, NotFoundError, ResolveError};
use crate::library::cache::{Cache, CacheExt, CacheKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// One generation of registry state
#[derive(Debug)]
pub struct Snapshot<T> {
    generation: u64,
    entries: HashMap<String, T>,
    refreshed_at: DateTime<Utc>,
}

impl<T> Snapshot<T> {
    fn empty() -> Self {
        Self {
            generation: 0,
            entries: HashMap::new(),
            refreshed_at: Utc::now(),
        }
    }

    /// Monotonically increasing refresh counter, zero before the first refresh
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Moment the snapshot has been built
    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Entry by key
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in arbitrary order
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }
}

/// Single writer, many reader store of event definitions keyed by name and archived events
/// keyed by record id
pub struct EventRegistry {
    generation: AtomicU64,
    active_tx: watch::Sender<Arc<Snapshot<Event>>>,
    active_rx: watch::Receiver<Arc<Snapshot<Event>>>,
    archived_tx: watch::Sender<Arc<Snapshot<ArchivedEvent>>>,
    archived_rx: watch::Receiver<Arc<Snapshot<ArchivedEvent>>>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// Creates a registry with empty snapshots
    pub fn new() -> Self {
        let (active_tx, active_rx) = watch::channel(Arc::new(Snapshot::empty()));
        let (archived_tx, archived_rx) = watch::channel(Arc::new(Snapshot::empty()));

        Self {
            generation: AtomicU64::new(0),
            active_tx,
            active_rx,
            archived_tx,
            archived_rx,
        }
    }

    /// Current generation of event definitions
    pub fn snapshot(&self) -> Arc<Snapshot<Event>> {
        self.active_rx.borrow().clone()
    }

    /// Current generation of archived events
    pub fn archived_snapshot(&self) -> Arc<Snapshot<ArchivedEvent>> {
        self.archived_rx.borrow().clone()
    }

    /// Looks up a definition by name in the current generation
    pub fn get_event(&self, name: &str) -> Result<Event, NotFoundError> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| NotFoundError(name.to_owned()))
    }

    /// Replaces all definitions. Later duplicates of a name win over earlier ones.
    pub fn refresh(&self, events: Vec<Event>) -> u64 {
        let entries = events
            .into_iter()
            .map(|event| (event.name.clone(), event))
            .collect();

        let generation = self.next_generation();
        self.active_tx
            .send(Arc::new(Snapshot {
                generation,
                entries,
                refreshed_at: Utc::now(),
            }))
            .ok();

        debug!(generation, "Refreshed event registry");
        generation
    }

    /// Replaces all archived events
    pub fn refresh_archived(&self, records: Vec<ArchivedEvent>) -> u64 {
        let entries = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let generation = self.next_generation();
        self.archived_tx
            .send(Arc::new(Snapshot {
                generation,
                entries,
                refreshed_at: Utc::now(),
            }))
            .ok();

        debug!(generation, "Refreshed archived events");
        generation
    }

    /// Flat copy of all archived events
    #[deprecated(note = "resolve definitions through `get_event` and read `archived_snapshot`")]
    pub fn archived_events(&self) -> Vec<ArchivedEvent> {
        self.archived_snapshot().values().cloned().collect()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Resolves event names through the registry, then the cache and finally the store
///
/// Only active definitions resolve, everything else is reported as [`NotFoundError`].
#[derive(Clone)]
pub struct EventResolver {
    registry: Arc<EventRegistry>,
    cache: Arc<dyn Cache>,
    store: Arc<dyn EventStore>,
    ttl: Duration,
}

impl EventResolver {
    /// Creates a resolver that caches store lookups for `ttl`
    pub fn new(
        registry: Arc<EventRegistry>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn EventStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            store,
            ttl,
        }
    }

    /// Cache key of a definition
    pub fn cache_key(name: &str) -> CacheKey {
        CacheKey::new(["event", name])
    }

    /// Underlying registry
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Underlying cache
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Expiry of cached definitions
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Active definition of an event
    pub async fn resolve(&self, name: &str) -> Result<Event, ResolveError> {
        if let Ok(event) = self.registry.get_event(name) {
            trace!(name, "Resolved event from registry");
            return ensure_active(event);
        }

        let store = self.store.clone();
        let owned_name = name.to_owned();

        let event: Event = self
            .cache
            .once(&Self::cache_key(name), self.ttl, || async move {
                match store.find(&owned_name).await? {
                    Some(event) => Ok(event),
                    None => Err(ResolveError::NotFound(NotFoundError(owned_name))),
                }
            })
            .await?;

        ensure_active(event)
    }
}

fn ensure_active(event: Event) -> Result<Event, ResolveError> {
    if event.is_active() {
        Ok(event)
    } else {
        Err(NotFoundError(event.name).into())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::store::MemoryEventStore;
    use crate::domain::EventState;
    use crate::library::cache::MemoryCache;

    fn event(name: &str, state: EventState) -> Event {
        Event {
            name: name.into(),
            state,
            ..Default::default()
        }
    }

    #[test]
    fn replace_whole_snapshot_on_refresh() {
        let registry = EventRegistry::new();

        registry.refresh(vec![
            event("e1", EventState::Active),
            event("e2", EventState::Active),
            event("e3", EventState::Active),
        ]);
        registry.refresh(vec![event("e2", EventState::Active)]);

        assert_eq!(registry.snapshot().len(), 1);
        assert!(registry.get_event("e2").is_ok());
        assert_eq!(
            registry.get_event("e1"),
            Err(NotFoundError("e1".into()))
        );
    }

    #[test]
    fn let_the_last_duplicate_win() {
        let registry = EventRegistry::new();

        registry.refresh(vec![
            event("x", EventState::Inactive),
            event("x", EventState::Active),
        ]);

        assert_eq!(registry.get_event("x").unwrap().state, EventState::Active);
    }

    #[test]
    fn keep_old_generation_for_readers() {
        let registry = EventRegistry::new();
        registry.refresh(vec![event("e1", EventState::Active)]);

        let held = registry.snapshot();
        let generation = registry.refresh(vec![]);

        assert!(held.get("e1").is_some());
        assert!(held.generation() < generation);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    #[allow(deprecated)]
    fn key_archived_events_by_record() {
        let registry = EventRegistry::new();
        let record = ArchivedEvent {
            id: "r1".into(),
            event_name: "e1".into(),
            state: EventState::Archived,
            topic: "event.internal".into(),
            attributes: Default::default(),
            data: serde_json::Value::Null,
            headers: Default::default(),
            trigger: None,
            delivered: Vec::new(),
            reason: String::new(),
            archived_at: Utc::now(),
        };

        registry.refresh_archived(vec![record.clone(), record.clone()]);

        assert_eq!(registry.archived_events(), vec![record]);
    }

    fn resolver(store: Arc<MemoryEventStore>, registry: Arc<EventRegistry>) -> EventResolver {
        let cache = Arc::new(MemoryCache::new(16, Duration::from_secs(60)));
        EventResolver::new(registry, cache, store, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn fall_back_to_the_store() {
        let store = Arc::new(MemoryEventStore::new());
        store
            .register(event("order.created", EventState::Active))
            .await
            .unwrap();
        let resolver = resolver(store, Arc::new(EventRegistry::new()));

        let resolved = resolver.resolve("order.created").await.unwrap();

        assert_eq!(resolved.name, "order.created");
        assert!(resolver
            .cache()
            .get::<Event>(&EventResolver::cache_key("order.created"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn report_unknown_and_inactive_events_as_missing() {
        let registry = Arc::new(EventRegistry::new());
        registry.refresh(vec![event("disabled", EventState::Inactive)]);
        let resolver = resolver(Arc::new(MemoryEventStore::new()), registry);

        assert!(matches!(
            resolver.resolve("unknown").await,
            Err(ResolveError::NotFound(_))
        ));
        assert!(matches!(
            resolver.resolve("disabled").await,
            Err(ResolveError::NotFound(_))
        ));
    }
}
