use crate::lease::SlotLeaser;
use jiff::SignedDuration;
use parking_lot::RwLock;
use raindrop_core::WorkerSlot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Counters of the heartbeat loop.
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    renewals: AtomicU64,
    failures: AtomicU64,
}

impl HeartbeatStats {
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// Renewals that were rejected or errored.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Background task that keeps the leased slot alive.
///
/// A successful renewal replaces the shared slot with the row read back from
/// the store. A failed one is logged and the last known slot is kept.
pub struct Heartbeat {
    token: CancellationToken,
    stats: Arc<HeartbeatStats>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Starts renewing `slot` every `interval` until `token` is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        leaser: SlotLeaser,
        slot: Arc<RwLock<WorkerSlot>>,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let stats = Arc::new(HeartbeatStats::default());
        let task_stats = Arc::clone(&stats);
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        beat(&leaser, &slot, interval, &task_stats).await;
                    }
                }
            }
            debug!("heartbeat stopped");
        });

        Self {
            token,
            stats,
            handle: Some(handle),
        }
    }

    pub fn stats(&self) -> &Arc<HeartbeatStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the loop and waits for an in-flight renewal to finish.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "heartbeat task failed");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn beat(
    leaser: &SlotLeaser,
    slot: &RwLock<WorkerSlot>,
    interval: Duration,
    stats: &HeartbeatStats,
) {
    let current = slot.read().clone();

    match leaser.renew(&current).await {
        Ok(Some(renewed)) => {
            debug!(
                worker_id = renewed.id,
                version = renewed.version,
                "renewed worker slot"
            );
            let heartbeat_time = renewed.heartbeat_time;
            *slot.write() = renewed;
            stats.renewals.fetch_add(1, Ordering::Relaxed);
            check_store_clock(leaser, heartbeat_time, interval).await;
        }
        Ok(None) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                worker_id = current.id,
                version = current.version,
                "worker slot changed under us; renewal not applied"
            );
        }
        Err(e) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            error!(worker_id = current.id, error = %e, "failed to renew worker slot");
        }
    }
}

async fn check_store_clock(leaser: &SlotLeaser, heartbeat_time: jiff::Timestamp, interval: Duration) {
    let store_now = match leaser.store().now().await {
        Ok(now) => now,
        Err(e) => {
            warn!(error = %e, "failed to read store clock");
            return;
        }
    };

    let gap = store_now.duration_since(heartbeat_time).abs();
    let limit = SignedDuration::try_from(interval).unwrap_or(SignedDuration::MAX);
    if gap > limit {
        warn!(%store_now, %heartbeat_time, %gap, "local clock drifts from the store clock");
    }
}
