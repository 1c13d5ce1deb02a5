use super::{Metric, MetricStore};
use crate::library::communication::event::{Transition, TransitionObserver};
use crate::library::EmptyResult;
use async_trait::async_trait;
use jatsl::{Job, JobManager};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{trace, warn};

const MAX_BATCH_SIZE: usize = 100;

/// Collects [`Transitions`](Transition) on the hot path and persists them in batches
///
/// Observing only enqueues into an unbounded channel. The [`Job`] implementation drains it
/// into the [`MetricStore`] until it is terminated, flushing whatever is left on its way out.
#[derive(Clone)]
pub struct MetricsRecorder {
    tx: UnboundedSender<Metric>,
    rx: Arc<Mutex<UnboundedReceiver<Metric>>>,
    store: Arc<dyn MetricStore>,
}

impl MetricsRecorder {
    /// Creates a recorder writing into `store`
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        let (tx, rx) = unbounded_channel();

        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            store,
        }
    }

    /// Queues a metric for persistence
    pub fn submit(&self, metric: Metric) {
        if self.tx.send(metric).is_err() {
            warn!("Metric recorder is gone, dropping metric");
        }
    }

    /// Persists everything that is queued right now without waiting for more
    pub async fn flush(&self) -> EmptyResult {
        let mut rx = self.rx.lock().await;

        loop {
            let mut batch = Vec::new();

            while batch.len() < MAX_BATCH_SIZE {
                match rx.try_recv() {
                    Ok(metric) => batch.push(metric),
                    Err(_) => break,
                }
            }

            if batch.is_empty() {
                return Ok(());
            }

            self.store.append(&batch).await?;
        }
    }

    async fn process(&self) {
        let mut rx = self.rx.lock().await;

        while let Some(metric) = rx.recv().await {
            let mut batch = vec![metric];

            while batch.len() < MAX_BATCH_SIZE {
                match rx.try_recv() {
                    Ok(metric) => batch.push(metric),
                    Err(_) => break,
                }
            }

            trace!(count = batch.len(), "Persisting metrics");

            if let Err(e) = self.store.append(&batch).await {
                warn!(count = batch.len(), "Failed to persist metrics: {}", e);
            }
        }
    }
}

impl TransitionObserver for MetricsRecorder {
    fn observe(&self, transition: Transition) {
        self.submit(transition.into());
    }
}

#[async_trait]
impl Job for MetricsRecorder {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        manager.ready().await;

        tokio::select! {
            _ = self.process() => {},
            _ = manager.termination_signal() => {},
        }

        self.flush().await
    }
}
