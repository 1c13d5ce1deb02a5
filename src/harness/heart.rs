//! Structures to keep the process alive until some event occurs

use std::fmt::{self, Formatter};
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, error, warn};

/// Reason why the heart stopped beating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeathReason {
    /// Internal kill signal has been sent
    Killed(String),
    /// SIGINT, SIGTERM or every stone has been dropped
    Terminated,
}

impl fmt::Display for DeathReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeathReason::Killed(reason) => write!(f, "Killed ({})", reason),
            DeathReason::Terminated => write!(f, "Terminated due to external signal"),
        }
    }
}

/// Lifecycle handle that keeps a module running until it is killed or the process is asked to stop
pub struct Heart {
    rx: Option<Receiver<String>>,
}

impl Heart {
    /// Creates a new heart and a linked stone which can kill it
    pub fn new() -> (Self, HeartStone) {
        let (tx, rx) = channel(1);
        (Self { rx: Some(rx) }, HeartStone { remote: tx })
    }

    /// Creates a heart that only dies from external signals
    pub fn without_heart_stone() -> Self {
        Self { rx: None }
    }

    /// Waits until the heart dies and returns why
    pub async fn death(&mut self) -> DeathReason {
        debug!("Heart starts beating");

        match self.rx.as_mut() {
            Some(rx) => tokio::select! {
                reason = rx.recv() => match reason {
                    Some(reason) => DeathReason::Killed(reason),
                    None => {
                        // All stones are gone, nobody can kill us anymore
                        termination_signal().await;
                        DeathReason::Terminated
                    }
                },
                _ = termination_signal() => DeathReason::Terminated,
            },
            None => {
                termination_signal().await;
                DeathReason::Terminated
            }
        }
    }
}

async fn termination_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            ctrl_c().await.ok();
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = ctrl_c() => {},
    }
}

/// Remote control for a [`Heart`]
#[derive(Clone)]
pub struct HeartStone {
    remote: Sender<String>,
}

impl HeartStone {
    /// Kills the associated heart
    pub async fn kill(&self, reason: String) {
        if self.remote.send(reason).await.is_err() {
            error!("Failed to kill heart, it is already dead");
        }
    }
}
