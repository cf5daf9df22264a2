//! Expiry reaper.
//!
//! Periodically scans the job store and evicts every job older than the
//! configured time-to-live, deleting its backing file and ending its
//! observer streams. Per-job cleanup failures never abort the rest of the
//! scan. The loop shuts down cooperatively through a cancellation token;
//! the final best-effort file purge at shutdown is the caller's job
//! (see [`JobStore::purge_files`]).

use crate::state::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn the periodic eviction loop.
pub fn spawn_reaper(
    store: Arc<JobStore>,
    ttl: chrono::Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so a fresh start
        // does not scan an empty store.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = reap_expired(&store, ttl);
                    if evicted > 0 {
                        tracing::info!(evicted, "reaper cycle evicted expired jobs");
                    }
                }
            }
        }
        tracing::info!("reaper stopped");
    })
}

/// One reaper cycle. Returns the number of jobs evicted.
pub fn reap_expired(store: &JobStore, ttl: chrono::Duration) -> usize {
    let expired = store.expired_ids(ttl);
    let count = expired.len();
    for id in expired {
        tracing::debug!(%id, "evicting expired job");
        // Cleanup failures inside remove are logged and swallowed, so one
        // bad job cannot shield the rest from eviction.
        store.remove(id);
    }
    count
}
