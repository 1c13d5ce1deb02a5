use super::{DeliveryError, SuccessCriterion};
use crate::domain::RequestPayload;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{instrument, trace};

/// Performs the HTTP call of a single delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Posts the payload data to its trigger
    async fn notify(
        &self,
        payload: &RequestPayload,
        criterion: SuccessCriterion,
    ) -> Result<(), DeliveryError>;
}

/// [`Notifier`] posting JSON with [`reqwest`]
#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    default_timeout: Duration,
}

impl HttpNotifier {
    /// Creates a notifier which uses `default_timeout` for triggers without their own timeout
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            default_timeout,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, payload), fields(event = %payload.event_name, url = %payload.url()))]
    async fn notify(
        &self,
        payload: &RequestPayload,
        criterion: SuccessCriterion,
    ) -> Result<(), DeliveryError> {
        let timeout = payload.trigger.timeout().unwrap_or(self.default_timeout);
        let mut request = self.client.post(payload.url()).timeout(timeout);

        for (name, value) in payload.headers.iter() {
            if !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .header(CONTENT_TYPE, "application/json")
            .json(&payload.data)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(timeout)
                } else if e.is_builder() {
                    DeliveryError::InvalidDestination(e.to_string())
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        trace!(status, "Destination responded");

        if criterion.accepts(status) {
            Ok(())
        } else {
            Err(DeliveryError::Status { status })
        }
    }
}

#[cfg(test)]
mod does {
    use super::super::receiver::Receiver;
    use super::*;
    use crate::domain::{Trigger, TriggerOption};
    use serde_json::json;
    use std::collections::HashMap;

    fn payload(receiver: &Receiver, path: &str, headers: HashMap<String, String>) -> RequestPayload {
        let trigger = Trigger {
            base_url: format!("{}/", receiver.base_url()),
            path: path.into(),
            headers: HashMap::from([
                ("X".to_string(), "B".to_string()),
                ("Y".to_string(), "C".to_string()),
            ]),
            ..Default::default()
        };

        RequestPayload::new("order.created".into(), trigger, json!({"id": 7}), &headers)
    }

    #[tokio::test]
    async fn post_json_with_merged_headers() {
        let receiver = Receiver::start(&[]).await;
        let notifier = HttpNotifier::new(Duration::from_secs(5));
        let headers = HashMap::from([("X".to_string(), "A".to_string())]);

        notifier
            .notify(&payload(&receiver, "/hook", headers), SuccessCriterion::OkOnly)
            .await
            .unwrap();

        let calls = receiver.calls_to("/hook");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body, json!({"id": 7}));
        assert_eq!(calls[0].header("x"), Some("A"));
        assert_eq!(calls[0].header("y"), Some("C"));
        assert_eq!(calls[0].header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn apply_the_success_criterion() {
        let receiver = Receiver::start(&[("/created", 201), ("/broken", 500)]).await;
        let notifier = HttpNotifier::new(Duration::from_secs(5));
        let created = payload(&receiver, "created", HashMap::new());

        assert!(notifier
            .notify(&created, SuccessCriterion::AnySuccess)
            .await
            .is_ok());
        assert_eq!(
            notifier.notify(&created, SuccessCriterion::OkOnly).await,
            Err(DeliveryError::Status { status: 201 })
        );
        assert_eq!(
            notifier
                .notify(
                    &payload(&receiver, "broken", HashMap::new()),
                    SuccessCriterion::AnySuccess
                )
                .await,
            Err(DeliveryError::Status { status: 500 })
        );
    }

    #[tokio::test]
    async fn bound_calls_by_the_trigger_timeout() {
        let receiver = Receiver::start(&[]).await;
        let notifier = HttpNotifier::new(Duration::from_secs(30));
        let mut slow = payload(&receiver, "/slow", HashMap::new());
        slow.trigger.option = TriggerOption {
            timeout: Some(1),
            ..Default::default()
        };

        assert_eq!(
            notifier.notify(&slow, SuccessCriterion::OkOnly).await,
            Err(DeliveryError::Timeout(Duration::from_secs(1)))
        );
    }
}
