//! HTTP interface to register events, publish them and inspect the broker

use async_trait::async_trait;
use jatsl::{schedule, JobScheduler};

mod handlers;
mod options;
mod server;

pub use options::Options;
pub use server::{routes, ServerJob};

use super::refresh::RegistryRefresh;
use super::BrokerContext;
use crate::harness::{Heart, Module, PeriodicJob};
use crate::library::{BoxedError, EmptyResult};

/// Module implementation
pub struct Api {
    options: Options,
    context: Option<BrokerContext>,
}

impl Api {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            context: None,
        }
    }
}

#[async_trait]
impl Module for Api {
    async fn pre_startup(&mut self) -> EmptyResult {
        let config = self.options.broker.config()?;
        config.ensure_shared_backends()?;
        let context = BrokerContext::connect(config).await?;
        context.load().await?;

        self.context = Some(context);
        Ok(())
    }

    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let context = self
            .context
            .clone()
            .ok_or("api module has not been started")?;

        let refresh_job = PeriodicJob::new(
            RegistryRefresh::new(context.registry.clone(), context.store.clone()),
            context.config.refresh_interval,
        );
        let metrics_job = context.recorder.clone();
        let server_job = ServerJob::new(self.options.port, context);

        schedule!(scheduler, { refresh_job, metrics_job, server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
