use super::{PublishOptions, QueueDescriptor, RawNotificationPublisher};
use crate::library::EmptyResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Single publish or consume of a notification, as seen from the outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Topic the notification travelled on
    pub topic: String,
    /// Consumer group that processed it, `None` for publishes
    pub consumer: Option<String>,
    /// Start of the operation
    pub started: DateTime<Utc>,
    /// End of the operation
    pub ended: DateTime<Utc>,
    /// Whether the operation succeeded
    pub success: bool,
}

/// Receiver of [`Transitions`](Transition)
///
/// Implementations must not block as they are called inline on the hot path.
pub trait TransitionObserver: Send + Sync {
    /// Records a transition
    fn observe(&self, transition: Transition);
}

impl TransitionObserver for () {
    fn observe(&self, _transition: Transition) {}
}

/// Publisher decorator reporting every publish to a [`TransitionObserver`]
#[derive(Clone)]
pub struct ObservedPublisher<P> {
    inner: P,
    observer: Arc<dyn TransitionObserver>,
}

impl<P> ObservedPublisher<P> {
    /// Wraps a publisher
    pub fn new(inner: P, observer: Arc<dyn TransitionObserver>) -> Self {
        Self { inner, observer }
    }

    /// Underlying publisher
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P> RawNotificationPublisher for ObservedPublisher<P>
where
    P: RawNotificationPublisher + Send + Sync,
{
    async fn publish_raw(
        &self,
        data: &[u8],
        descriptor: QueueDescriptor,
        options: &PublishOptions,
    ) -> EmptyResult {
        let topic = descriptor.key().to_owned();
        let started = Utc::now();
        let result = self.inner.publish_raw(data, descriptor, options).await;

        self.observer.observe(Transition {
            topic,
            consumer: None,
            started,
            ended: Utc::now(),
            success: result.is_ok(),
        });

        result
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingObserver(Mutex<Vec<Transition>>);

    impl TransitionObserver for CollectingObserver {
        fn observe(&self, transition: Transition) {
            self.0.lock().unwrap().push(transition);
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl RawNotificationPublisher for FailingPublisher {
        async fn publish_raw(
            &self,
            _data: &[u8],
            _descriptor: QueueDescriptor,
            _options: &PublishOptions,
        ) -> EmptyResult {
            Err("broker unavailable".into())
        }
    }

    #[tokio::test]
    async fn record_failed_publishes() {
        let observer = Arc::new(CollectingObserver::default());
        let publisher = ObservedPublisher::new(FailingPublisher, observer.clone());

        let result = publisher
            .publish_raw(
                b"{}",
                QueueDescriptor::new("orders".into(), 10),
                &PublishOptions::default(),
            )
            .await;

        assert!(result.is_err());

        let recorded = observer.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].topic, "orders");
        assert_eq!(recorded[0].consumer, None);
        assert!(!recorded[0].success);
        assert!(recorded[0].started <= recorded[0].ended);
    }
}
