use super::{DeathReason, Heart};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::lock::Mutex;
use jatsl::{JobScheduler, State, StatusServer};
use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

/// Executable module
#[async_trait]
pub trait Module {
    /// Executed before running the core loop, connections are established and validated here
    async fn pre_startup(&mut self) -> EmptyResult {
        Ok(())
    }

    /// Core run loop of the module
    ///
    /// When the function returns `Some(_)` the death of the returned [`Heart`] is awaited before
    /// jobs are terminated. Returning `None` shuts the module down right away.
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError>;

    /// Shutdown hook executed after all jobs have been terminated
    async fn post_shutdown(&mut self) {}
}

/// Reason why a module has terminated
#[derive(Error, Debug)]
pub enum ModuleTerminationReason {
    /// Startup routine threw an error
    #[error("startup routine threw an error")]
    StartupFailed(#[source] BoxedError),
    /// Core run loop threw an error
    #[error("error during operation")]
    OperationalError(#[source] BoxedError),
    /// [`Heart`] provided by module died
    #[error("heart provided by module died: {0}")]
    HeartDied(DeathReason),
    /// Run loop exited cleanly
    #[error("run loop exited cleanly")]
    ExitedNormally,
    /// Timeout during startup
    #[error("timeout during startup")]
    Timeout,
}

impl ModuleTerminationReason {
    /// Whether the module went down because something broke
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::HeartDied(_) | Self::ExitedNormally)
    }
}

/// Runner for [`Module`] implementations
pub struct ModuleRunner {
    startup_timeout: Duration,
    shutdown_timeout: Duration,
    status_server_port: Option<u16>,
}

impl Default for ModuleRunner {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
            status_server_port: None,
        }
    }
}

impl ModuleRunner {
    /// Creates a runner that optionally exposes the jatsl status server
    pub fn new(status_server_port: Option<u16>) -> Self {
        Self {
            status_server_port,
            ..Default::default()
        }
    }

    /// Executes a [`Module`] by calling its lifecycle functions in order and returns why it terminated
    #[instrument(skip(self, module), fields(module_name = type_name::<M>()))]
    pub async fn run<M: Module + Send + Sync>(&self, mut module: M) -> ModuleTerminationReason {
        let scheduler = JobScheduler::default();
        let mut readiness = None;

        if let Some(port) = self.status_server_port {
            info!(port, "Spawning status server");
            let (state, status_server) = StatusServer::new(&scheduler, port);
            scheduler.spawn_job(status_server).await;
            readiness = Some(state);
        }

        info!("Commencing module startup sequence");
        let termination_reason = match timeout(self.startup_timeout, module.pre_startup()).await {
            Ok(Ok(_)) => Self::run_loop(&mut module, &scheduler, readiness.as_ref()).await,
            Ok(Err(error)) => {
                error!(%error, "Module startup sequence encountered an error");
                ModuleTerminationReason::StartupFailed(error)
            }
            Err(_) => {
                error!("Module startup sequence timed out");
                ModuleTerminationReason::Timeout
            }
        };

        if let Some(state) = readiness.as_ref() {
            *state.lock().await = State::Shutdown;
        }

        info!("Terminating remaining jobs");
        scheduler.terminate_jobs(self.shutdown_timeout).await;

        info!("Commencing module shutdown sequence");
        if timeout(self.shutdown_timeout, module.post_shutdown())
            .await
            .is_err()
        {
            error!("Module shutdown sequence timed out");
        }

        if termination_reason.is_failure() {
            error!(reason = %termination_reason, "Module terminated with an error");
        } else {
            info!(reason = %termination_reason, "Module exited normally");
        }

        termination_reason
    }

    async fn run_loop<M: Module + Send + Sync>(
        module: &mut M,
        scheduler: &JobScheduler,
        readiness: Option<&Arc<Mutex<State>>>,
    ) -> ModuleTerminationReason {
        info!("Executing module run procedure");

        match module.run(scheduler).await {
            Ok(None) => {
                debug!("Module run procedure completed successfully");
                ModuleTerminationReason::ExitedNormally
            }
            Ok(Some(mut heart)) => {
                debug!("Module run procedure completed successfully, entering run loop");
                if let Some(state) = readiness {
                    *state.lock().await = State::Running;
                }

                let death_reason = heart.death().await;
                info!(%death_reason, "Heart provided by run procedure died");
                ModuleTerminationReason::HeartDied(death_reason)
            }
            Err(error) => {
                error!(%error, "Module run procedure encountered an error");
                ModuleTerminationReason::OperationalError(error)
            }
        }
    }
}
