use crate::domain::delivery::FanOut;
use crate::domain::registry::{EventRegistry, EventResolver};
use crate::domain::store::EventStore;
use crate::domain::{ArchivedEvent, Event, ResolveError, Trigger};
use crate::harness::Periodic;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Replays archived events against the triggers that are currently registered
///
/// Reached triggers are remembered on the record so later rounds skip them, records without
/// pending triggers are dropped from the store. Failures keep the record for the next round,
/// there is no upper bound on the number of rounds.
pub struct ArchiveSweep {
    registry: Arc<EventRegistry>,
    resolver: EventResolver,
    store: Arc<dyn EventStore>,
    fanout: FanOut,
    refresh_interval: Duration,
    refreshed_at: Mutex<Option<Instant>>,
}

impl ArchiveSweep {
    /// Creates a new sweep which reloads the archive from the store every `refresh_interval`
    pub fn new(
        resolver: EventResolver,
        store: Arc<dyn EventStore>,
        fanout: FanOut,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            registry: resolver.registry().clone(),
            resolver,
            store,
            fanout,
            refresh_interval,
            refreshed_at: Mutex::new(None),
        }
    }

    async fn refresh_if_due(&self) {
        let mut refreshed_at = self.refreshed_at.lock().await;

        if let Some(at) = *refreshed_at {
            if at.elapsed() < self.refresh_interval {
                return;
            }
        }

        match self.store.fetch_all_archived().await {
            Ok(records) => {
                let count = records.len();
                let generation = self.registry.refresh_archived(records);
                *refreshed_at = Some(Instant::now());
                debug!(generation, records = count, "Refreshed archived events");
            }
            Err(e) => warn!("Keeping previous archive snapshot: {}", e),
        }
    }

    /// Replays a single record, returns the updated record or `None` once it is done
    async fn replay(&self, record: &ArchivedEvent) -> Result<Option<ArchivedEvent>, BoxedError> {
        let event = match self.resolver.resolve(&record.event_name).await {
            Ok(event) => event,
            Err(ResolveError::NotFound(e)) => {
                debug!(id = record.id.as_str(), "Keeping archived event: {}", e);
                return Ok(Some(record.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let triggers = targets(record, &event);
        let report = self
            .fanout
            .deliver(
                &record.event_name,
                &triggers,
                &record.data,
                &record.headers,
                &record.delivered,
            )
            .await;

        let mut updated = record.clone();
        for identity in report.delivered.iter() {
            self.store.mark_delivered(&record.id, identity).await?;
            updated.delivered.push(identity.clone());
        }

        if report.is_complete() {
            self.store.remove_archived(&record.id).await?;
            info!(
                id = record.id.as_str(),
                event = record.event_name.as_str(),
                "Replayed archived event"
            );
            return Ok(None);
        }

        for (identity, error) in report.failed.iter() {
            debug!(
                id = record.id.as_str(),
                url = %identity,
                "Archived event is still undeliverable: {}",
                error
            );
        }

        Ok(Some(updated))
    }
}

/// Currently registered triggers the record has to be delivered to
fn targets(record: &ArchivedEvent, event: &Event) -> Vec<Trigger> {
    match &record.trigger {
        Some(failed) => {
            let identity = failed.identity();
            event
                .triggers
                .iter()
                .filter(|trigger| trigger.identity() == identity)
                .take(1)
                .cloned()
                .collect()
        }
        None => event.triggers.clone(),
    }
}

#[async_trait]
impl Periodic for ArchiveSweep {
    const NAME: &'static str = "ArchiveSweep";

    async fn tick(&self) -> EmptyResult {
        self.refresh_if_due().await;

        let snapshot = self.registry.archived_snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }

        let mut changes: HashMap<String, Option<ArchivedEvent>> = HashMap::new();

        for record in snapshot.values() {
            match self.replay(record).await {
                Ok(Some(updated)) if &updated == record => {}
                Ok(outcome) => {
                    changes.insert(record.id.clone(), outcome);
                }
                Err(e) => warn!(id = record.id.as_str(), "Failed to replay archived event: {}", e),
            }
        }

        if !changes.is_empty() {
            let remaining = snapshot
                .values()
                .filter_map(|record| match changes.remove(&record.id) {
                    Some(outcome) => outcome,
                    None => Some(record.clone()),
                })
                .collect();

            self.registry.refresh_archived(remaining);
        }

        Ok(())
    }
}
