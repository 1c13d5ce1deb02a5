use crate::domain::delivery::{Notifier, SuccessCriterion};
use crate::domain::RequestPayload;
use crate::harness::{BrokerPublisher, Service};
use crate::library::communication::event::Consumer;
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Performs the webhook call of a single queued delivery
///
/// A failed call is handed back to the queue backend which retries it within the budget of the
/// trigger and eventually dead-letters it.
pub struct DeliveryService {
    notifier: Arc<dyn Notifier>,
}

impl Service for DeliveryService {
    const NAME: &'static str = "DeliveryService";
    type Instance = DeliveryService;
    type Config = Arc<dyn Notifier>;

    fn instantiate(_publisher: BrokerPublisher, notifier: &Self::Config) -> Self::Instance {
        Self {
            notifier: notifier.clone(),
        }
    }
}

#[async_trait]
impl Consumer for DeliveryService {
    type Notification = RequestPayload;

    async fn consume(&self, request: Self::Notification) -> EmptyResult {
        self.notifier
            .notify(&request, SuccessCriterion::AnySuccess)
            .await?;

        debug!(
            event = request.event_name.as_str(),
            url = request.url().as_str(),
            "Delivered event"
        );

        Ok(())
    }
}
