//! Durable storage of event definitions and archived events

mod memory;
mod mongo;

pub use memory::*;
pub use mongo::*;

use super::{ArchivedEvent, Event, EventState, EventType, StoreError, Trigger, TriggerIdentity};
use async_trait::async_trait;
use serde::Deserialize;

const DEFAULT_PAGE_LIMIT: u64 = 20;
const MAX_PAGE_LIMIT: u64 = 100;

/// Query parameters for listing event definitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventFilter {
    /// Only events owned by this team
    #[serde(default)]
    pub team_owner: Option<String>,
    /// Only events produced by this service
    #[serde(default)]
    pub service_name: Option<String>,
    /// Only events in this state
    #[serde(default)]
    pub state: Option<EventState>,
    /// One based page number
    #[serde(default)]
    pub page: Option<u64>,
    /// Page size
    #[serde(default)]
    pub limit: Option<u64>,
}

impl EventFilter {
    /// Whether an event passes the field filters, ignoring pagination
    pub fn matches(&self, event: &Event) -> bool {
        self.team_owner
            .as_ref()
            .map_or(true, |team| &event.team_owner == team)
            && self
                .service_name
                .as_ref()
                .map_or(true, |service| &event.service_name == service)
            && self.state.map_or(true, |state| event.state == state)
    }

    /// Requested page, starting at 1
    pub fn page(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Effective page size
    pub fn limit(&self) -> u64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    /// Number of matching events to skip
    pub fn skip(&self) -> u64 {
        (self.page() - 1) * self.limit()
    }
}

/// Partial update of an event definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventPatch {
    #[allow(missing_docs)]
    #[serde(default)]
    pub service_name: Option<String>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub repo_url: Option<String>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub team_owner: Option<String>,
    #[allow(missing_docs)]
    #[serde(rename = "type", default)]
    pub kind: Option<EventType>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub state: Option<EventState>,
    /// Replaces the whole trigger list
    #[serde(default, alias = "consumers")]
    pub triggers: Option<Vec<Trigger>>,
}

impl EventPatch {
    /// Patch that disables an event
    pub fn disable() -> Self {
        Self {
            state: Some(EventState::Inactive),
            ..Default::default()
        }
    }

    /// Overwrites every field that is set in the patch
    pub fn apply(self, event: &mut Event) {
        if let Some(service_name) = self.service_name {
            event.service_name = service_name;
        }

        if let Some(repo_url) = self.repo_url {
            event.repo_url = repo_url;
        }

        if let Some(team_owner) = self.team_owner {
            event.team_owner = team_owner;
        }

        if let Some(kind) = self.kind {
            event.kind = kind;
        }

        if let Some(state) = self.state {
            event.state = state;
        }

        if let Some(triggers) = self.triggers {
            event.triggers = triggers;
        }
    }
}

/// Persistent home of event definitions and the archive
///
/// Definitions are unique by name, service, type and state. Registering a definition that
/// collides with an existing one replaces it while keeping its id.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// All active definitions
    async fn fetch_all(&self) -> Result<Vec<Event>, StoreError>;

    /// All archived events waiting for the sweep
    async fn fetch_all_archived(&self) -> Result<Vec<ArchivedEvent>, StoreError>;

    /// Active definition by name
    async fn find(&self, name: &str) -> Result<Option<Event>, StoreError>;

    /// Page of definitions matching the filter, ordered by name
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    /// Creates or replaces a definition and returns it with its id
    async fn register(&self, event: Event) -> Result<Event, StoreError>;

    /// Patches a definition, returns `None` if the id is unknown
    async fn update(&self, id: &str, patch: EventPatch) -> Result<Option<Event>, StoreError>;

    /// Marks a definition inactive, returns `None` if the id is unknown
    async fn disable(&self, id: &str) -> Result<Option<Event>, StoreError> {
        self.update(id, EventPatch::disable()).await
    }

    /// Persists an undeliverable event
    async fn archive(&self, record: ArchivedEvent) -> Result<(), StoreError>;

    /// Remembers that a destination of an archived event has been reached
    async fn mark_delivered(&self, id: &str, identity: &TriggerIdentity) -> Result<(), StoreError>;

    /// Drops an archived event once it has been delivered everywhere
    async fn remove_archived(&self, id: &str) -> Result<(), StoreError>;
}
