use super::{EventFilter, EventPatch, EventStore};
use crate::domain::{ArchivedEvent, Event, EventState, StoreError, TriggerIdentity};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{
    CreateCollectionOptions, CreateIndexOptions, FindOptions, IndexOptions, ReplaceOptions,
};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::debug;
use uuid::Uuid;

const EVENTS_COLLECTION: &str = "events";
const ARCHIVED_COLLECTION: &str = "archived";

/// Error code returned when creating a collection that already exists
const NAMESPACE_EXISTS: i32 = 48;

/// [`EventStore`] backed by MongoDB
///
/// Definitions live in the `events` collection with a unique index on name, service, type and
/// state. Archived events live in the `archived` collection.
#[derive(Clone)]
pub struct MongoEventStore {
    events: Collection<Event>,
    archived: Collection<ArchivedEvent>,
}

impl MongoEventStore {
    /// Connects to the database and provisions collections and indices
    pub async fn connect(url: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(url).await?;
        let database = client.database(database);

        upsert_collection(&database, EVENTS_COLLECTION).await?;
        upsert_collection(&database, ARCHIVED_COLLECTION).await?;

        let events: Collection<Event> = database.collection(EVENTS_COLLECTION);
        let archived: Collection<ArchivedEvent> = database.collection(ARCHIVED_COLLECTION);

        let unique = IndexOptions::builder().unique(true).build();

        events
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "name": 1, "service_name": 1, "type": 1, "state": 1 })
                    .options(unique.clone())
                    .build(),
                CreateIndexOptions::default(),
            )
            .await?;

        events
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(unique.clone())
                    .build(),
                CreateIndexOptions::default(),
            )
            .await?;

        archived
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(unique)
                    .build(),
                CreateIndexOptions::default(),
            )
            .await?;

        debug!(database = database.name(), "Event store provisioned");

        Ok(Self { events, archived })
    }
}

async fn upsert_collection(database: &Database, name: &str) -> mongodb::error::Result<()> {
    if let Err(e) = database
        .create_collection(name, CreateCollectionOptions::default())
        .await
    {
        if let ErrorKind::Command(ce) = (*e.kind).clone() {
            if ce.code == NAMESPACE_EXISTS {
                return Ok(());
            }
        }
        return Err(e);
    }

    Ok(())
}

fn filter_document(filter: &EventFilter) -> Document {
    let mut document = Document::new();

    if let Some(team_owner) = &filter.team_owner {
        document.insert("team_owner", team_owner);
    }

    if let Some(service_name) = &filter.service_name {
        document.insert("service_name", service_name);
    }

    if let Some(state) = filter.state {
        document.insert("state", state.as_str());
    }

    document
}

fn identity_document(event: &Event) -> Result<Document, StoreError> {
    Ok(doc! {
        "name": &event.name,
        "service_name": &event.service_name,
        "type": to_bson(&event.kind)?,
        "state": event.state.as_str(),
    })
}

#[async_trait]
impl EventStore for MongoEventStore {
    async fn fetch_all(&self) -> Result<Vec<Event>, StoreError> {
        let cursor = self
            .events
            .find(doc! { "state": EventState::Active.as_str() }, None)
            .await?;

        Ok(cursor.try_collect().await?)
    }

    async fn fetch_all_archived(&self) -> Result<Vec<ArchivedEvent>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "archived_at": 1 }).build();
        let cursor = self.archived.find(None, options).await?;

        Ok(cursor.try_collect().await?)
    }

    async fn find(&self, name: &str) -> Result<Option<Event>, StoreError> {
        let filter = doc! { "name": name, "state": EventState::Active.as_str() };
        Ok(self.events.find_one(filter, None).await?)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "name": 1 })
            .skip(filter.skip())
            .limit(filter.limit() as i64)
            .build();

        let cursor = self.events.find(filter_document(filter), options).await?;

        Ok(cursor.try_collect().await?)
    }

    async fn register(&self, mut event: Event) -> Result<Event, StoreError> {
        let identity = identity_document(&event)?;

        match self.events.find_one(identity.clone(), None).await? {
            Some(existing) => event.id = existing.id,
            None if event.id.is_empty() => event.id = Uuid::new_v4().to_string(),
            None => {}
        }

        let options = ReplaceOptions::builder().upsert(true).build();
        self.events.replace_one(identity, &event, options).await?;

        Ok(event)
    }

    async fn update(&self, id: &str, patch: EventPatch) -> Result<Option<Event>, StoreError> {
        let mut event = match self.events.find_one(doc! { "id": id }, None).await? {
            Some(event) => event,
            None => return Ok(None),
        };

        patch.apply(&mut event);
        self.events
            .replace_one(doc! { "id": id }, &event, None)
            .await?;

        Ok(Some(event))
    }

    async fn archive(&self, record: ArchivedEvent) -> Result<(), StoreError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.archived
            .replace_one(doc! { "id": &record.id }, &record, options)
            .await?;

        Ok(())
    }

    async fn mark_delivered(&self, id: &str, identity: &TriggerIdentity) -> Result<(), StoreError> {
        self.archived
            .update_one(
                doc! { "id": id },
                doc! { "$addToSet": { "delivered": to_bson(identity)? } },
                None,
            )
            .await?;

        Ok(())
    }

    async fn remove_archived(&self, id: &str) -> Result<(), StoreError> {
        self.archived.delete_one(doc! { "id": id }, None).await?;
        Ok(())
    }
}
