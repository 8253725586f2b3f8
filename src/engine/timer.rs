use std::sync::{Arc, Mutex};

use async_channel::{Receiver, Sender};
use chrono::Duration;
use uuid::Uuid;

use super::Engine;
use crate::{
    api::AllocationAPI,
    error::{unexpected_error, Error},
};

/// Arranges for `expire_offer` to run once an offer's TTL has elapsed.
pub trait ExpiryScheduler: Send + Sync {
    fn schedule(&self, ride_id: Uuid, after: Duration) -> Result<(), Error>;
}

/// Slack added to every timer so it never fires before the offer's TTL has
/// elapsed on the engine's clock.
const EXPIRY_GRACE: std::time::Duration = std::time::Duration::from_millis(250);

/// Sleeps on the tokio runtime, then emits the ride id for
/// [`Engine::run_expiry_loop`] to pick up.
#[derive(Clone, Debug)]
pub struct TimerScheduler {
    tx: Sender<Uuid>,
}

impl TimerScheduler {
    pub fn new() -> (Self, Receiver<Uuid>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl ExpiryScheduler for TimerScheduler {
    fn schedule(&self, ride_id: Uuid, after: Duration) -> Result<(), Error> {
        let handle = tokio::runtime::Handle::try_current().map_err(|err| {
            tracing::error!(%err, "expiry timer needs a tokio runtime");
            unexpected_error()
        })?;

        let delay = after.to_std().unwrap_or_default() + EXPIRY_GRACE;
        let tx = self.tx.clone();

        handle.spawn(async move {
            tokio::time::sleep(delay).await;

            if tx.send(ride_id).await.is_err() {
                tracing::debug!(%ride_id, "expiry loop has shut down");
            }
        });

        Ok(())
    }
}

/// Records requests instead of running timers; expiry is driven by hand.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    scheduled: Mutex<Vec<(Uuid, Duration)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(Uuid, Duration)> {
        self.scheduled
            .lock()
            .map(|scheduled| scheduled.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl ExpiryScheduler for ManualScheduler {
    fn schedule(&self, ride_id: Uuid, after: Duration) -> Result<(), Error> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((ride_id, after));

        Ok(())
    }
}

impl Engine {
    /// Expires offers as their timers fire, until every sender is dropped.
    #[tracing::instrument(name = "Engine::run_expiry_loop", skip_all)]
    pub async fn run_expiry_loop(self: Arc<Self>, rx: Receiver<Uuid>) {
        while let Ok(ride_id) = rx.recv().await {
            match self.expire_offer(ride_id).await {
                Ok(Some(allocation)) => {
                    tracing::info!(%ride_id, ?allocation, "reallocated after offer expiry")
                }
                Ok(None) => tracing::debug!(%ride_id, "no expired offer outstanding"),
                Err(err) if err.is_allocation_failed() => {
                    tracing::warn!(%ride_id, %err, "giving up on ride")
                }
                Err(err) => tracing::warn!(%ride_id, %err, "reallocation after expiry failed"),
            }
        }

        tracing::info!("expiry loop stopped");
    }
}
