use super::{DeliveryError, Notifier, SuccessCriterion};
use crate::domain::{RequestPayload, Trigger, TriggerIdentity};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Outcome of delivering one event to many triggers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Triggers reached by this call
    pub delivered: Vec<TriggerIdentity>,
    /// Triggers that have been reached before and were left out
    pub skipped: Vec<TriggerIdentity>,
    /// Triggers that could not be reached, at most one entry per identity
    pub failed: BTreeMap<TriggerIdentity, DeliveryError>,
}

impl FanOutReport {
    /// Whether every attempted trigger has been reached
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turns the report into an aggregate error if any trigger failed
    pub fn into_result(self) -> Result<Vec<TriggerIdentity>, FanOutError> {
        if self.failed.is_empty() {
            Ok(self.delivered)
        } else {
            Err(FanOutError {
                failed: self.failed,
            })
        }
    }
}

/// At least one trigger of a fan-out could not be reached
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct FanOutError {
    /// Failures keyed by trigger identity
    pub failed: BTreeMap<TriggerIdentity, DeliveryError>,
}

impl Display for FanOutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "delivery failed for {} trigger(s):", self.failed.len())?;

        for (identity, error) in self.failed.iter() {
            write!(f, " [{}: {}]", identity, error)?;
        }

        Ok(())
    }
}

/// Delivers one event to several triggers concurrently
///
/// Every trigger is handled by its own task so a slow or failing destination never holds back
/// its siblings. Results are funnelled through a channel and joined once all tasks reported
/// or the completion timeout elapsed, whatever comes first.
#[derive(Clone)]
pub struct FanOut {
    notifier: Arc<dyn Notifier>,
    criterion: SuccessCriterion,
    completion_timeout: Duration,
}

impl FanOut {
    /// Creates a fan-out which gives up on unfinished deliveries after `completion_timeout`
    pub fn new(
        notifier: Arc<dyn Notifier>,
        criterion: SuccessCriterion,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            notifier,
            criterion,
            completion_timeout,
        }
    }

    /// Delivers to every trigger that is not listed in `delivered`.
    ///
    /// Triggers sharing an identity are delivered to once, the first definition wins.
    pub async fn deliver(
        &self,
        event_name: &str,
        triggers: &[Trigger],
        data: &Value,
        headers: &HashMap<String, String>,
        delivered: &[TriggerIdentity],
    ) -> FanOutReport {
        let mut report = FanOutReport::default();
        let mut targets: BTreeMap<TriggerIdentity, &Trigger> = BTreeMap::new();

        for trigger in triggers {
            let identity = trigger.identity();

            if delivered.contains(&identity) {
                if !report.skipped.contains(&identity) {
                    report.skipped.push(identity);
                }
            } else {
                targets.entry(identity).or_insert(trigger);
            }
        }

        if targets.is_empty() {
            return report;
        }

        let (tx, mut rx) = mpsc::channel(targets.len());
        let mut handles = Vec::with_capacity(targets.len());

        for (identity, trigger) in targets.iter() {
            let payload = RequestPayload::new(
                event_name.to_owned(),
                (*trigger).clone(),
                data.clone(),
                headers,
            );
            let notifier = self.notifier.clone();
            let criterion = self.criterion;
            let identity = identity.clone();
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let outcome = notifier.notify(&payload, criterion).await;
                tx.send((identity, outcome)).await.ok();
            }));
        }

        drop(tx);

        let deadline = Instant::now() + self.completion_timeout;
        let mut pending: BTreeSet<TriggerIdentity> = targets.keys().cloned().collect();

        while !pending.is_empty() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((identity, outcome))) => {
                    pending.remove(&identity);

                    match outcome {
                        Ok(_) => report.delivered.push(identity),
                        Err(e) => {
                            debug!(event = event_name, trigger = %identity, "Delivery failed: {}", e);
                            report.failed.insert(identity, e);
                        }
                    }
                }
                // All senders are gone, remaining tasks panicked
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        event = event_name,
                        pending = pending.len(),
                        "Fan-out did not complete within {:?}",
                        self.completion_timeout
                    );
                    break;
                }
            }
        }

        for handle in handles {
            handle.abort();
        }

        for identity in pending {
            report.failed.insert(identity, DeliveryError::Aborted);
        }

        report
    }
}
