use crate::domain::registry::EventResolver;
use crate::domain::{InternalPayload, PublishError, RequestPayload, ResolveError};
use crate::harness::{BrokerPublisher, Service};
use crate::library::communication::event::{
    Consumer, Notification, NotificationPublisher, QueueClass, QueueError,
};
use crate::library::EmptyResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Expands internal events into one queued delivery per registered trigger
pub struct DispatchService {
    publisher: BrokerPublisher,
    resolver: EventResolver,
    default_class: QueueClass,
    max_retries: u32,
}

impl Service for DispatchService {
    const NAME: &'static str = "DispatchService";
    type Instance = DispatchService;
    type Config = (EventResolver, QueueClass, u32);

    fn instantiate(publisher: BrokerPublisher, config: &Self::Config) -> Self::Instance {
        let (resolver, default_class, max_retries) = config;

        Self {
            publisher,
            resolver: resolver.clone(),
            default_class: *default_class,
            max_retries: *max_retries,
        }
    }
}

#[async_trait]
impl Consumer for DispatchService {
    type Notification = InternalPayload;

    async fn consume(&self, payload: Self::Notification) -> EmptyResult {
        if let Err(e) = payload.validate() {
            warn!(event = payload.event_name.as_str(), "Dropping invalid event: {}", e);
            return Ok(());
        }

        let class = match payload.opts.publish_options(self.default_class) {
            Ok(options) => options.class,
            Err(e) => {
                warn!(event = payload.event_name.as_str(), "Dropping event: {}", e);
                return Ok(());
            }
        };

        let event = match self.resolver.resolve(&payload.event_name).await {
            Ok(event) => event,
            Err(ResolveError::NotFound(e)) => {
                info!("Nothing to deliver: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let InternalPayload { data, metadata, .. } = payload;
        let data = data.unwrap_or(Value::Null);
        let mut seen = HashSet::new();
        let mut failure = None;

        for trigger in event.triggers.into_iter() {
            if !seen.insert(trigger.identity()) {
                continue;
            }

            let options = trigger.publish_options(class, self.max_retries);
            let request =
                RequestPayload::new(event.name.clone(), trigger, data.clone(), &metadata.headers);

            match self.publisher.publish_with_options(&request, &options).await {
                Ok(_) => debug!(
                    event = event.name.as_str(),
                    url = request.url().as_str(),
                    "Scheduled delivery"
                ),
                Err(e) if e.downcast_ref::<QueueError>() == Some(&QueueError::Duplicate) => debug!(
                    event = event.name.as_str(),
                    url = request.url().as_str(),
                    "Skipped duplicate delivery"
                ),
                Err(e) => {
                    warn!(
                        event = event.name.as_str(),
                        url = request.url().as_str(),
                        "Failed to schedule delivery: {}",
                        e
                    );
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(source) => Err(PublishError {
                topic: RequestPayload::queue().key().to_owned(),
                source,
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::{Event, Metadata, Trigger};
    use crate::library::communication::event::{
        BoxedQueueEntry, ConsumerGroupDescriptor, ConsumerGroupIdentifier, QueueProvider,
        RawQueueEntry,
    };
    use crate::module::options::BrokerConfig;
    use crate::module::BrokerContext;
    use futures::stream::BoxStream;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    type Deliveries = BoxStream<'static, Result<BoxedQueueEntry, crate::library::BoxedError>>;

    fn trigger(path: &str) -> Trigger {
        Trigger {
            base_url: "http://billing.local".into(),
            path: path.into(),
            headers: HashMap::from([("X-Source".to_string(), "trigger".to_string())]),
            ..Default::default()
        }
    }

    async fn setup() -> (BrokerContext, DispatchService, Deliveries) {
        let context = BrokerContext::in_memory(BrokerConfig::in_memory()).unwrap();
        context.registry.refresh(vec![Event {
            name: "order.created".into(),
            triggers: vec![trigger("/one"), trigger("/two"), trigger("/one")],
            ..Default::default()
        }]);

        let group = ConsumerGroupDescriptor::new(ConsumerGroupIdentifier::Delivery);
        let deliveries = context
            .strategy
            .provider(QueueClass::PubSub)
            .unwrap()
            .consume(RequestPayload::queue(), &group, "test", 10, None)
            .await
            .unwrap();

        let service = DispatchService::instantiate(
            context.publisher.clone(),
            &(context.resolver.clone(), QueueClass::PubSub, 5),
        );

        (context, service, deliveries)
    }

    async fn next_delivery(deliveries: &mut Deliveries) -> RequestPayload {
        let entry = tokio::time::timeout(Duration::from_secs(2), deliveries.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        serde_json::from_slice(entry.payload()).unwrap()
    }

    #[tokio::test]
    async fn publish_one_delivery_per_trigger() {
        let (_context, service, mut deliveries) = setup().await;

        service
            .consume(InternalPayload {
                event_name: "order.created".into(),
                data: Some(json!({ "id": 7 })),
                metadata: Metadata {
                    headers: HashMap::from([("X-Source".to_string(), "payload".to_string())]),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();

        let mut urls = vec![
            next_delivery(&mut deliveries).await,
            next_delivery(&mut deliveries).await,
        ]
        .into_iter()
        .map(|delivery| {
            assert_eq!(delivery.data, json!({ "id": 7 }));
            assert_eq!(
                delivery.headers.get("X-Source").map(String::as_str),
                Some("payload")
            );
            delivery.url()
        })
        .collect::<Vec<_>>();
        urls.sort();

        assert_eq!(
            urls,
            vec!["http://billing.local/one", "http://billing.local/two"]
        );

        let extra = tokio::time::timeout(Duration::from_millis(200), deliveries.next()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn acknowledge_unknown_and_invalid_events() {
        let (_context, service, mut deliveries) = setup().await;

        service
            .consume(InternalPayload {
                event_name: "order.deleted".into(),
                data: Some(json!({ "id": 7 })),
                ..Default::default()
            })
            .await
            .unwrap();

        service
            .consume(InternalPayload {
                event_name: "order.created".into(),
                data: None,
                ..Default::default()
            })
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_millis(200), deliveries.next()).await;
        assert!(delivery.is_err());
    }
}
