use crate::library::EmptyResult;
use async_trait::async_trait;
use futures::FutureExt;
use jatsl::{Job, JobManager};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

/// Unit of work that is repeated on a fixed interval
#[async_trait]
pub trait Periodic: Send + Sync {
    /// Name displayed in log messages
    const NAME: &'static str;

    /// Executes one round of work
    async fn tick(&self) -> EmptyResult;
}

/// Job executing a [`Periodic`] until it is terminated
///
/// The first tick happens right away. A tick that fails or panics is logged and the next one
/// runs on schedule, so one bad round never stops the loop.
pub struct PeriodicJob<P> {
    inner: P,
    interval: Duration,
}

impl<P: Periodic> PeriodicJob<P> {
    /// Creates a job ticking every `interval`
    pub fn new(inner: P, interval: Duration) -> Self {
        Self { inner, interval }
    }

    /// Runs a single supervised tick and reports whether it succeeded
    pub async fn supervised_tick(&self) -> bool {
        match AssertUnwindSafe(self.inner.tick()).catch_unwind().await {
            Ok(Ok(_)) => {
                debug!(job = P::NAME, "Tick completed");
                true
            }
            Ok(Err(e)) => {
                warn!(job = P::NAME, "Tick failed: {}", e);
                false
            }
            Err(_) => {
                error!(job = P::NAME, "Tick panicked");
                false
            }
        }
    }
}

#[async_trait]
impl<P: Periodic> Job for PeriodicJob<P> {
    const NAME: &'static str = "PeriodicJob";
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    fn name(&self) -> String {
        format!("{}({})", Self::NAME, P::NAME)
    }

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let termination = manager.termination_signal();
        tokio::pin!(termination);

        manager.ready().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.supervised_tick().await;
                }
                _ = &mut termination => break,
            }
        }

        Ok(())
    }
}
