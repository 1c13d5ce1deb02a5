//! Module consuming the event topics and replaying archived events
//!
//! Every enabled queue backend gets its own set of consumers so that events are processed no
//! matter which class they have been published with.

use async_trait::async_trait;
use jatsl::{schedule, JobScheduler};
use std::sync::Arc;
use tracing::info;

mod options;
mod services;

pub use options::Options;
use services::*;

use super::refresh::RegistryRefresh;
use super::BrokerContext;
use crate::domain::delivery::{FanOut, HttpNotifier, Notifier, SuccessCriterion};
use crate::harness::{Heart, Module, PeriodicJob, ServiceRunner};
use crate::library::communication::event::{
    ConsumerGroupDescriptor, ConsumerGroupIdentifier, TransitionObserver,
};
use crate::library::{BoxedError, EmptyResult};

/// Module implementation
pub struct Worker {
    options: Options,
    context: Option<BrokerContext>,
}

impl Worker {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            context: None,
        }
    }

    /// Creates an instance around an already connected context
    pub fn with_context(options: Options, context: BrokerContext) -> Self {
        Self {
            options,
            context: Some(context),
        }
    }
}

#[async_trait]
impl Module for Worker {
    async fn pre_startup(&mut self) -> EmptyResult {
        if self.context.is_none() {
            let config = self.options.broker.config()?;
            config.ensure_shared_backends()?;
            let context = BrokerContext::connect(config).await?;
            context.load().await?;
            self.context = Some(context);
        }

        Ok(())
    }

    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let context = self
            .context
            .clone()
            .ok_or("worker module has not been started")?;
        let config = &context.config;

        let observer: Arc<dyn TransitionObserver> = Arc::new(context.recorder.clone());
        let notifier: Arc<dyn Notifier> = Arc::new(HttpNotifier::new(config.delivery_timeout));

        for class in context.strategy.enabled() {
            info!(%class, "Consuming event topics");

            let dispatch_service = ServiceRunner::<DispatchService>::new(
                context.strategy.clone(),
                class,
                context.publisher.clone(),
                observer.clone(),
                ConsumerGroupDescriptor::new(ConsumerGroupIdentifier::Dispatcher),
                config.instance.clone(),
                config.concurrency,
                (
                    context.resolver.clone(),
                    config.default_class,
                    config.max_retries,
                ),
            );

            let delivery_service = ServiceRunner::<DeliveryService>::new(
                context.strategy.clone(),
                class,
                context.publisher.clone(),
                observer.clone(),
                ConsumerGroupDescriptor::new(ConsumerGroupIdentifier::Delivery),
                config.instance.clone(),
                config.concurrency,
                notifier.clone(),
            );

            let dead_letter_service = ServiceRunner::<DeadLetterService>::new(
                context.strategy.clone(),
                class,
                context.publisher.clone(),
                observer.clone(),
                ConsumerGroupDescriptor::new(ConsumerGroupIdentifier::Archiver),
                config.instance.clone(),
                config.concurrency,
                context.store.clone(),
            );

            scheduler.spawn_job(dispatch_service).await;
            scheduler.spawn_job(delivery_service).await;
            scheduler.spawn_job(dead_letter_service).await;
        }

        let refresh_job = PeriodicJob::new(
            RegistryRefresh::new(context.registry.clone(), context.store.clone()),
            config.refresh_interval,
        );

        let sweep_job = PeriodicJob::new(
            ArchiveSweep::new(
                context.resolver.clone(),
                context.store.clone(),
                FanOut::new(notifier, SuccessCriterion::OkOnly, config.fanout_timeout),
                config.archived_refresh_interval,
            ),
            self.options.sweep_interval,
        );

        let metrics_job = context.recorder.clone();

        schedule!(scheduler, { refresh_job, sweep_job, metrics_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
