//! Expiry listener task.
//!
//! Receives expired key names from the store subscription and hands each one
//! to the scheduler on its own task, so a slow publish never delays the
//! notifications behind it.
//!
//! The listener ends on shutdown or when the subscription closes (Redis
//! restart, dropped pub/sub connection). Either way the scheduler accepts a
//! new `start_consumption` call once it has exited.

use std::fmt;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::event_scheduler::Scheduler;
use crate::store::ExpiredKeys;

/// How long `shutdown` waits for in-flight fires before giving up on them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Why the listener stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// A shutdown was requested through the handle.
    Shutdown,
    /// The store closed the expiry subscription.
    SubscriptionClosed,
    /// The listener task panicked or was cancelled.
    Aborted,
}

impl fmt::Display for ListenerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown requested"),
            Self::SubscriptionClosed => f.write_str("expiry subscription closed"),
            Self::Aborted => f.write_str("listener task aborted"),
        }
    }
}

/// Handle to a running expiry listener.
///
/// Dropping the handle also stops the listener, without waiting.
#[derive(Debug)]
pub struct ConsumptionHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<ListenerExit>,
    exit: Option<ListenerExit>,
}

impl ConsumptionHandle {
    /// Stops receiving notifications and waits for in-flight fires to finish.
    pub async fn shutdown(mut self) -> ListenerExit {
        // Ignore send error - the listener may have already stopped
        let _ = self.shutdown_tx.send(());
        self.stopped().await
    }

    /// Resolves once the listener has exited, for whatever reason.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to a shutdown signal.
    pub async fn stopped(&mut self) -> ListenerExit {
        if let Some(exit) = self.exit {
            return exit;
        }

        let exit = match (&mut self.handle).await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "Expiry listener task failed");
                ListenerExit::Aborted
            }
        };
        self.exit = Some(exit);
        exit
    }

    /// Whether the listener has stopped, either by shutdown or because the
    /// subscription closed.
    pub fn is_finished(&self) -> bool {
        self.exit.is_some() || self.handle.is_finished()
    }
}

/// Releases the scheduler's consumption slot when the listener task ends,
/// including by panic.
struct ConsumptionSlot(Scheduler);

impl Drop for ConsumptionSlot {
    fn drop(&mut self) {
        self.0.release_consumption();
    }
}

pub(crate) fn spawn_listener(scheduler: Scheduler, expired: ExpiredKeys) -> ConsumptionHandle {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(listen(ConsumptionSlot(scheduler), expired, shutdown_rx));

    ConsumptionHandle {
        shutdown_tx,
        handle,
        exit: None,
    }
}

async fn listen(
    slot: ConsumptionSlot,
    mut expired: ExpiredKeys,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> ListenerExit {
    let scheduler = &slot.0;
    let mut in_flight = JoinSet::new();

    let exit = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Expiry listener received shutdown signal");
                break ListenerExit::Shutdown;
            }
            key = expired.recv() => {
                let Some(key) = key else {
                    error!("Expiry subscription closed, listener stopping");
                    break ListenerExit::SubscriptionClosed;
                };
                let scheduler = scheduler.clone();
                in_flight.spawn(async move {
                    let outcome = scheduler.on_expiry_notification(&key).await;
                    debug!(key = %key, outcome = %outcome, "Notification handled");
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Fire task panicked");
                }
            }
        }
    };

    let drain = async {
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Fire task panicked");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "In-flight fires did not finish in time, aborting"
        );
    }

    exit
}
