//! Module running the HTTP interface and the worker in a single process
//!
//! Both halves share one [`BrokerContext`], which allows running the broker without any external
//! infrastructure when combined with `--pubsub-client memory`.

use async_trait::async_trait;
use jatsl::JobScheduler;
use structopt::StructOpt;

use super::api::ServerJob;
use super::worker::{self, Worker};
use super::BrokerContext;
use crate::harness::{Heart, Module};
use crate::library::{BoxedError, EmptyResult};

/// Options for the standalone module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub worker: worker::Options,

    /// Port on which the HTTP server will listen
    #[structopt(short, long, env, default_value = "8080")]
    pub port: u16,
}

/// Module implementation
pub struct Standalone {
    options: Options,
    context: Option<BrokerContext>,
}

impl Standalone {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self {
            options,
            context: None,
        }
    }
}

#[async_trait]
impl Module for Standalone {
    async fn pre_startup(&mut self) -> EmptyResult {
        let config = self.options.worker.broker.config()?;
        let context = BrokerContext::connect(config).await?;
        context.load().await?;

        self.context = Some(context);
        Ok(())
    }

    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let context = self
            .context
            .clone()
            .ok_or("standalone module has not been started")?;

        let mut worker = Worker::with_context(self.options.worker.clone(), context.clone());
        let heart = worker.run(scheduler).await?;

        let server_job = ServerJob::new(self.options.port, context);
        scheduler.spawn_job(server_job).await;

        Ok(heart)
    }
}
