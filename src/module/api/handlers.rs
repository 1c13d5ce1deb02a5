use super::super::BrokerContext;
use crate::domain::insights::Insights;
use crate::domain::registry::EventResolver;
use crate::domain::store::{EventFilter, EventPatch};
use crate::domain::{ArchivedEvent, ConfigError, Event, InternalPayload, ResolveError};
use crate::library::cache::{Cache, CacheExt};
use crate::library::communication::event::{NotificationPublisher, QueueError};
use crate::library::communication::implementation::redis::TaskEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};
use warp::Rejection;

const DEFAULT_ARCHIVE_LIMIT: usize = 100;

/// Uniform reply of every handler
pub type HandlerReply = Result<WithStatus<Json>, Rejection>;

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct Accepted<'a> {
    event_name: &'a str,
    class: String,
}

/// Query of the archived tasks listing
#[derive(Debug, Default, Deserialize)]
pub struct ArchiveQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ArchivedTasks {
    queue: String,
    tasks: Vec<TaskEnvelope>,
    events: Vec<ArchivedEvent>,
}

fn failure(status: StatusCode, error: &str, message: impl Display) -> WithStatus<Json> {
    reply::with_status(
        reply::json(&ErrorReply {
            error: error.to_owned(),
            message: message.to_string(),
        }),
        status,
    )
}

fn success<T: Serialize>(value: &T, status: StatusCode) -> WithStatus<Json> {
    reply::with_status(reply::json(value), status)
}

async fn invalidate(cache: &dyn Cache, name: &str) {
    if let Err(e) = cache.delete(&EventResolver::cache_key(name)).await {
        warn!(event = name, "Failed to invalidate cached event: {}", e);
    }
}

/// Accepts an event for asynchronous dispatch
pub async fn publish(payload: InternalPayload, context: BrokerContext) -> HandlerReply {
    if let Err(e) = payload.validate() {
        return Ok(failure(StatusCode::BAD_REQUEST, "invalid payload", e));
    }

    let options = match payload.opts.publish_options(context.config.default_class) {
        Ok(options) => options,
        Err(e) => return Ok(failure(StatusCode::BAD_REQUEST, "invalid options", e)),
    };

    if !context.strategy.enabled().contains(&options.class) {
        let e = ConfigError::ClassNotEnabled(options.class.to_string());
        return Ok(failure(StatusCode::BAD_REQUEST, "invalid options", e));
    }

    match context.resolver.resolve(&payload.event_name).await {
        Ok(_) => {}
        Err(ResolveError::NotFound(e)) => {
            return Ok(failure(StatusCode::NOT_FOUND, "event not found", e));
        }
        Err(e) => {
            warn!(event = payload.event_name.as_str(), "Failed to resolve event: {}", e);
            return Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "event lookup failed",
                e,
            ));
        }
    }

    match context.publisher.publish_with_options(&payload, &options).await {
        Ok(_) => {
            debug!(event = payload.event_name.as_str(), class = %options.class, "Accepted event");
            Ok(success(
                &Accepted {
                    event_name: &payload.event_name,
                    class: options.class.to_string(),
                },
                StatusCode::ACCEPTED,
            ))
        }
        Err(e) if e.downcast_ref::<QueueError>() == Some(&QueueError::Duplicate) => {
            Ok(failure(StatusCode::CONFLICT, "duplicate event", e))
        }
        Err(e) => {
            warn!(event = payload.event_name.as_str(), "Failed to publish event: {}", e);
            Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "event not published",
                e,
            ))
        }
    }
}

/// Creates or replaces an event definition
pub async fn register(event: Event, context: BrokerContext) -> HandlerReply {
    if let Err(e) = event.validate() {
        return Ok(failure(StatusCode::BAD_REQUEST, "invalid event", e));
    }

    let key = EventResolver::cache_key(&event.name);
    let store = context.store.clone();
    let registered: Result<Event, ResolveError> = context
        .cache
        .hydrate(&key, context.config.cache_ttl, || async move {
            Ok(store.register(event).await?)
        })
        .await;

    match registered {
        Ok(event) => {
            info!(event = event.name.as_str(), id = event.id.as_str(), "Registered event");
            Ok(success(&event, StatusCode::CREATED))
        }
        Err(e) => {
            warn!("Failed to register event: {}", e);
            Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "event not registered",
                e,
            ))
        }
    }
}

/// Applies a partial update and refreshes the cached definition
pub async fn update(id: String, patch: EventPatch, context: BrokerContext) -> HandlerReply {
    let event = match context.store.update(&id, patch).await {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(failure(StatusCode::NOT_FOUND, "event not found", id)),
        Err(e) => {
            warn!(id = id.as_str(), "Failed to update event: {}", e);
            return Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "event not updated",
                e,
            ));
        }
    };

    if event.is_active() {
        let key = EventResolver::cache_key(&event.name);
        if let Err(e) = context.cache.set(&key, &event, context.config.cache_ttl).await {
            warn!(event = event.name.as_str(), "Failed to cache event: {}", e);
        }
    } else {
        invalidate(context.cache.as_ref(), &event.name).await;
    }

    Ok(success(&event, StatusCode::OK))
}

/// Deactivates a definition, it stops being dispatched once the registry refreshes
pub async fn disable(id: String, context: BrokerContext) -> HandlerReply {
    match context.store.disable(&id).await {
        Ok(Some(event)) => {
            invalidate(context.cache.as_ref(), &event.name).await;
            info!(event = event.name.as_str(), id = id.as_str(), "Disabled event");
            Ok(success(&event, StatusCode::OK))
        }
        Ok(None) => Ok(failure(StatusCode::NOT_FOUND, "event not found", id)),
        Err(e) => {
            warn!(id = id.as_str(), "Failed to disable event: {}", e);
            Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "event not disabled",
                e,
            ))
        }
    }
}

/// Page of definitions matching the filter
pub async fn list(filter: EventFilter, context: BrokerContext) -> HandlerReply {
    match context.store.list(&filter).await {
        Ok(events) => Ok(success(&events, StatusCode::OK)),
        Err(e) => Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "events not listed",
            e,
        )),
    }
}

/// Active definition by name
pub async fn get(name: String, context: BrokerContext) -> HandlerReply {
    match context.resolver.resolve(&name).await {
        Ok(event) => Ok(success(&event, StatusCode::OK)),
        Err(ResolveError::NotFound(e)) => Ok(failure(StatusCode::NOT_FOUND, "event not found", e)),
        Err(e) => Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "event lookup failed",
            e,
        )),
    }
}

/// Aggregated throughput, latency and success rates
pub async fn insights(context: BrokerContext) -> HandlerReply {
    match context.metrics.all().await {
        Ok(metrics) => Ok(success(&Insights::compute(&metrics), StatusCode::OK)),
        Err(e) => Ok(failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics unavailable",
            e,
        )),
    }
}

/// Dead-lettered tasks of a queue together with the archive records of its topic
pub async fn archived(queue: String, query: ArchiveQuery, context: BrokerContext) -> HandlerReply {
    let limit = query.limit.unwrap_or(DEFAULT_ARCHIVE_LIMIT);

    let tasks = match context.strategy.task_queue() {
        Ok(task_queue) => match task_queue.archived(&queue, limit).await {
            Ok(tasks) => tasks,
            Err(e) => {
                return Ok(failure(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "archived tasks unavailable",
                    e,
                ))
            }
        },
        Err(_) => Vec::new(),
    };

    let events = match context.store.fetch_all_archived().await {
        Ok(records) => records
            .into_iter()
            .filter(|record| record.topic == queue)
            .take(limit)
            .collect(),
        Err(e) => {
            return Ok(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "archived events unavailable",
                e,
            ))
        }
    };

    Ok(success(
        &ArchivedTasks {
            queue,
            tasks,
            events,
        },
        StatusCode::OK,
    ))
}

#[cfg(test)]
mod does {
    use super::super::routes;
    use super::*;
    use crate::domain::{EventState, Trigger};
    use crate::module::options::BrokerConfig;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn context() -> BrokerContext {
        BrokerContext::in_memory(BrokerConfig::in_memory()).unwrap()
    }

    fn order_created() -> Value {
        json!({
            "name": "order.created",
            "service_name": "orders",
            "team_owner": "checkout",
            "triggers": [{ "base_url": "http://billing.local", "path": "/hooks/order" }]
        })
    }

    async fn register_order_created(context: &BrokerContext) -> Event {
        let response = warp::test::request()
            .method("POST")
            .path("/event/consumer")
            .json(&order_created())
            .reply(&routes(context.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn answer_ping() {
        let response = warp::test::request()
            .path("/ping")
            .reply(&routes(context()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), "pong");
    }

    #[tokio::test]
    async fn reject_invalid_payloads() {
        let routes = routes(context());

        let empty_name = warp::test::request()
            .method("POST")
            .path("/event/publisher")
            .json(&json!({ "event_name": " ", "data": { "id": 1 } }))
            .reply(&routes)
            .await;
        assert_eq!(empty_name.status(), StatusCode::BAD_REQUEST);

        let no_data = warp::test::request()
            .method("POST")
            .path("/api/v1/pubsub")
            .json(&json!({ "event_name": "order.created" }))
            .reply(&routes)
            .await;
        assert_eq!(no_data.status(), StatusCode::BAD_REQUEST);

        let disabled_class = warp::test::request()
            .method("POST")
            .path("/event/publisher")
            .json(&json!({
                "event_name": "order.created",
                "data": { "id": 1 },
                "opts": { "class": "task-queue" }
            }))
            .reply(&routes)
            .await;
        assert_eq!(disabled_class.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reject_unknown_events() {
        let response = warp::test::request()
            .method("POST")
            .path("/event/publisher")
            .json(&json!({ "event_name": "order.created", "data": { "id": 1 } }))
            .reply(&routes(context()))
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn accept_registered_events() {
        let context = context();
        register_order_created(&context).await;

        let response = warp::test::request()
            .method("POST")
            .path("/api/v1/pubsub")
            .json(&json!({ "event_name": "order.created", "data": { "id": 1 } }))
            .reply(&routes(context.clone()))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        context.recorder.flush().await.unwrap();
        let metrics = context.metrics.all().await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].topic_name, "event.internal");
        assert!(metrics[0].is_publish());
        assert!(metrics[0].ack);
    }

    #[tokio::test]
    async fn register_update_and_disable_events() {
        let context = context();
        let routes = routes(context.clone());
        let event = register_order_created(&context).await;
        assert!(!event.id.is_empty());

        let patched = warp::test::request()
            .method("PATCH")
            .path(&format!("/event/{}", event.id))
            .json(&json!({ "team_owner": "payments" }))
            .reply(&routes)
            .await;
        assert_eq!(patched.status(), StatusCode::OK);

        let fetched = warp::test::request()
            .path("/events/order.created")
            .reply(&routes)
            .await;
        let fetched: Event = serde_json::from_slice(fetched.body()).unwrap();
        assert_eq!(fetched.team_owner, "payments");

        let disabled = warp::test::request()
            .method("DELETE")
            .path(&format!("/event/{}", event.id))
            .reply(&routes)
            .await;
        assert_eq!(disabled.status(), StatusCode::OK);
        let disabled: Event = serde_json::from_slice(disabled.body()).unwrap();
        assert_eq!(disabled.state, EventState::Inactive);

        let gone = warp::test::request()
            .path("/events/order.created")
            .reply(&routes)
            .await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_unknown_ids() {
        let routes = routes(context());

        let patched = warp::test::request()
            .method("PATCH")
            .path("/event/missing")
            .json(&json!({ "team_owner": "payments" }))
            .reply(&routes)
            .await;
        assert_eq!(patched.status(), StatusCode::NOT_FOUND);

        let disabled = warp::test::request()
            .method("DELETE")
            .path("/event/missing")
            .reply(&routes)
            .await;
        assert_eq!(disabled.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_events_by_filter() {
        let context = context();
        register_order_created(&context).await;
        context
            .store
            .register(Event {
                name: "invoice.sent".into(),
                team_owner: "billing".into(),
                triggers: vec![Trigger {
                    base_url: "http://mail.local".into(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let response = warp::test::request()
            .path("/events?team_owner=billing&page=1&limit=10")
            .reply(&routes(context))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let events: Vec<Event> = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "invoice.sent");
    }

    #[tokio::test]
    async fn serve_insights() {
        let response = warp::test::request()
            .path("/insights")
            .reply(&routes(context()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let insights: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(insights["published"]["total"], 0);
    }

    #[tokio::test]
    async fn list_archived_records_of_a_queue() {
        let context = context();
        context
            .store
            .archive(ArchivedEvent {
                id: "a-1".into(),
                event_name: "order.created".into(),
                state: EventState::Archived,
                topic: "event.external".into(),
                attributes: HashMap::new(),
                data: json!({ "id": 1 }),
                headers: HashMap::new(),
                trigger: None,
                delivered: Vec::new(),
                reason: "timeout".into(),
                archived_at: Utc::now(),
            })
            .await
            .unwrap();

        let response = warp::test::request()
            .path("/tasks/archived/event.external?limit=5")
            .reply(&routes(context))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["events"][0]["id"], "a-1");
        assert_eq!(body["tasks"], json!([]));
    }
}
