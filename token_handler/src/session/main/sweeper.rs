//! Periodic purge of expired session records.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::session::errors::SessionError;
use crate::storage::{SessionStore, StoreError};

/// Deletes records that can no longer back any valid cookie.
///
/// A cookie lives at most `retention` after its last write, and a record is
/// written no later than its `expires_at`, so everything with
/// `expires_at < now - retention` is unreachable.
pub async fn purge_expired(store: &dyn SessionStore, retention: Duration) -> Result<u64, StoreError> {
    let retention =
        chrono::Duration::from_std(retention).map_err(|e| StoreError::Storage(e.to_string()))?;
    store.purge(Utc::now() - retention).await
}

/// Owner of the sweep loop. Dropping it cancels the loop.
pub(super) struct Sweeper {
    store: Arc<dyn SessionStore>,
    interval: Duration,
    retention: Duration,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: Arc<watch::Sender<bool>>,
}

/// Raises the stopped flag when the loop future is dropped, whether it
/// returned, panicked or was torn down with the runtime.
struct ExitSignal(Arc<watch::Sender<bool>>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl Sweeper {
    pub(super) fn new(
        store: Arc<dyn SessionStore>,
        interval: Duration,
        retention: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            interval,
            retention,
            cancel,
            started: AtomicBool::new(false),
            stopped: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Spawns the loop on the first call only. Returns whether it spawned.
    pub(super) fn start(&self) -> Result<bool, SessionError> {
        let runtime = Handle::try_current().map_err(|e| {
            SessionError::Configuration(format!("the session sweeper needs a Tokio runtime: {e}"))
        })?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        runtime.spawn(run(
            self.store.clone(),
            self.interval,
            self.retention,
            self.cancel.clone(),
            ExitSignal(self.stopped.clone()),
        ));
        Ok(true)
    }

    pub(super) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Waits until the loop has exited, including any purge in flight.
    /// Every caller waits; returns at once if the loop never started.
    pub(super) async fn wait(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let mut stopped = self.stopped.subscribe();
        if stopped.wait_for(|done| *done).await.is_err() {
            tracing::warn!("Session sweeper exit signal lost");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    store: Arc<dyn SessionStore>,
    period: Duration,
    retention: Duration,
    cancel: CancellationToken,
    _exit: ExitSignal,
) {
    tracing::info!(
        interval_secs = period.as_secs(),
        retention_secs = retention.as_secs(),
        "Session sweeper started"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                match purge_expired(store.as_ref(), retention).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "Session sweeper: purged expired sessions");
                    }
                    Ok(_) => tracing::debug!("Session sweeper: no sessions to purge"),
                    Err(e) => tracing::error!(error = %e, "Session sweeper: purge failed"),
                }
            }
        }
    }
}
