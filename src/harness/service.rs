use crate::library::communication::event::{
    ConsumerExt, ConsumerGroupDescriptor, ObservedPublisher, QueueClass, TransitionObserver,
};
use crate::library::communication::QueueStrategy;
use crate::library::EmptyResult;
use async_trait::async_trait;
use jatsl::{Job, JobManager};
use std::sync::Arc;
use tracing::info;

/// Publisher handed to services, reports every publish to the metrics
pub type BrokerPublisher = ObservedPublisher<QueueStrategy>;

/// Structure which can be instantiated with a [`BrokerPublisher`]
pub trait Service {
    /// Name of the service displayed in log messages
    const NAME: &'static str;
    /// Instance type which will be instantiated
    type Instance: Send + Sync;
    /// Configuration type passed to the service
    type Config: Send + Sync;

    /// Creates a new instance
    fn instantiate(publisher: BrokerPublisher, config: &Self::Config) -> Self::Instance;
}

/// Runner for [`Service`] implementations whose instance is a [`Consumer`](crate::library::communication::event::Consumer)
///
/// Consumes from the backend of a single [`QueueClass`]. Modules schedule one runner per enabled
/// class to consume a topic regardless of the backend it has been published to.
pub struct ServiceRunner<S: Service> {
    strategy: QueueStrategy,
    class: QueueClass,
    publisher: BrokerPublisher,
    observer: Arc<dyn TransitionObserver>,
    group: ConsumerGroupDescriptor,
    consumer: String,
    concurrency: usize,
    config: S::Config,
}

impl<S> ServiceRunner<S>
where
    S: Service,
    S::Instance: ConsumerExt,
{
    /// Creates a new runner job consuming as `consumer` within `group`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: QueueStrategy,
        class: QueueClass,
        publisher: BrokerPublisher,
        observer: Arc<dyn TransitionObserver>,
        group: ConsumerGroupDescriptor,
        consumer: String,
        concurrency: usize,
        config: S::Config,
    ) -> Self {
        Self {
            strategy,
            class,
            publisher,
            observer,
            group,
            consumer,
            concurrency,
            config,
        }
    }
}

#[async_trait]
impl<S> Job for ServiceRunner<S>
where
    S: Service + Send + Sync,
    S::Instance: ConsumerExt,
{
    const NAME: &'static str = "ServiceRunner";
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    fn name(&self) -> String {
        format!("{}({}, {})", Self::NAME, S::NAME, self.class)
    }

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let provider = self.strategy.provider(self.class)?;
        let service = S::instantiate(self.publisher.clone(), &self.config);

        manager.ready().await;

        tokio::select! {
            result = service.consume_queue(
                provider,
                &self.group,
                &self.consumer,
                self.concurrency,
                self.observer.as_ref(),
            ) => result?,
            _ = manager.termination_signal() => {
                info!(service = S::NAME, class = %self.class, "Stopped consuming");
            }
        }

        Ok(())
    }
}
