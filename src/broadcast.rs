//! Per-job progress broadcasting.
//!
//! Every active job owns one event channel and one set of live observers.
//! Producers (which may run on blocking worker threads) enqueue job
//! snapshots through a thread-safe unbounded sender; a dedicated fan-out
//! task per job drains the channel and forwards each snapshot to every
//! currently-registered observer, dropping observers whose receivers have
//! disconnected. The fan-out task exits once the job is terminal and no
//! observers remain, or after idling with no observers.

use crate::state::{Job, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use uuid::Uuid;

/// Buffered snapshots per observer before delivery suspends.
const OBSERVER_BUFFER: usize = 32;

/// How long the fan-out task idles with no observers before giving up.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

type ObserverSet = Arc<Mutex<Vec<mpsc::Sender<Job>>>>;

/// The broadcast side of one job: event channel plus observer registry.
///
/// Dropping the channel (or removing it from the store) closes the event
/// stream, which lets the fan-out task drain and exit, ending every
/// observer's stream.
#[derive(Debug, Clone)]
pub struct JobChannel {
    tx: mpsc::UnboundedSender<Job>,
    observers: ObserverSet,
}

impl JobChannel {
    /// Open a channel for a job and spawn its fan-out task.
    pub fn open(job_id: Uuid) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let observers: ObserverSet = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(fan_out(job_id, rx, Arc::clone(&observers)));
        Self { tx, observers }
    }

    /// Enqueue a snapshot for delivery.
    ///
    /// Safe to call from any thread. Never blocks; if the fan-out task is
    /// gone the snapshot is dropped rather than stalling the producer.
    pub fn publish(&self, snapshot: Job) {
        if self.tx.send(snapshot).is_err() {
            tracing::debug!("progress event dropped: fan-out task gone");
        }
    }

    /// Register a new observer, seeding it with the current snapshot so it
    /// never sees a gap before its first live event.
    pub async fn attach(&self, snapshot: Job) -> mpsc::Receiver<Job> {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        // Seed under the registry lock: the fan-out task also takes this
        // lock to deliver, so the seed always lands first.
        let mut observers = self.observers.lock().await;
        let _ = tx.send(snapshot).await;
        observers.push(tx);
        rx
    }

    /// Number of currently registered observers (test hook).
    #[cfg(test)]
    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }
}

/// Build a stream holding exactly one snapshot and then end-of-stream.
///
/// Used when an observer subscribes to a job that has already reached a
/// terminal state: it receives the terminal snapshot and nothing else.
pub fn seeded_closed(snapshot: Job) -> mpsc::Receiver<Job> {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 on a fresh channel: completes immediately.
    let _ = tx.try_send(snapshot);
    rx
}

async fn fan_out(job_id: Uuid, mut rx: mpsc::UnboundedReceiver<Job>, observers: ObserverSet) {
    let mut last_status: Option<JobStatus> = None;

    loop {
        match timeout(IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(snapshot)) => {
                last_status = Some(snapshot.status);
                let terminal = snapshot.status.is_terminal();

                let mut obs = observers.lock().await;
                let mut kept = Vec::with_capacity(obs.len());
                for tx in obs.drain(..) {
                    // A failed send means the observer hung up; drop it and
                    // keep delivering to the rest.
                    if tx.send(snapshot.clone()).await.is_ok() {
                        kept.push(tx);
                    }
                }
                *obs = kept;

                if terminal && obs.is_empty() {
                    break;
                }
            }
            // Channel closed: the job record was removed.
            Ok(None) => break,
            Err(_elapsed) => {
                let mut obs = observers.lock().await;
                // No event has flushed hung-up observers out; do it here,
                // otherwise a settled job keeps its fan-out task alive.
                obs.retain(|tx| !tx.is_closed());
                let settled = last_status.is_none_or(|s| s.is_terminal());
                if obs.is_empty() && settled {
                    break;
                }
            }
        }
    }

    observers.lock().await.clear();
    tracing::debug!(%job_id, "fan-out task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: JobStatus) -> Job {
        let mut job = Job::new(Uuid::new_v4());
        job.status = status;
        if status == JobStatus::Error {
            job.error = Some("failed".into());
        }
        job
    }

    #[tokio::test]
    async fn observer_receives_seed_then_live_events() {
        let channel = JobChannel::open(Uuid::new_v4());
        let mut rx = channel.attach(snapshot(JobStatus::Queued)).await;

        let seed = rx.recv().await.unwrap();
        assert_eq!(seed.status, JobStatus::Queued);

        channel.publish(snapshot(JobStatus::Starting));
        let live = rx.recv().await.unwrap();
        assert_eq!(live.status, JobStatus::Starting);
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let channel = JobChannel::open(Uuid::new_v4());
        let mut rx = channel.attach(snapshot(JobStatus::Queued)).await;
        let _ = rx.recv().await.unwrap(); // seed

        for status in [
            JobStatus::Starting,
            JobStatus::Downloading,
            JobStatus::Postprocessing,
        ] {
            channel.publish(snapshot(status));
        }
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Starting);
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Downloading);
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Postprocessing);
    }

    #[tokio::test]
    async fn disconnected_observer_is_dropped_without_aborting_broadcast() {
        let channel = JobChannel::open(Uuid::new_v4());
        let dead = channel.attach(snapshot(JobStatus::Queued)).await;
        let mut live = channel.attach(snapshot(JobStatus::Queued)).await;
        let _ = live.recv().await.unwrap(); // seed
        drop(dead);

        channel.publish(snapshot(JobStatus::Starting));
        assert_eq!(live.recv().await.unwrap().status, JobStatus::Starting);

        // The dead observer gets pruned on the first failed delivery.
        tokio::task::yield_now().await;
        assert_eq!(channel.observer_count().await, 1);
    }

    #[tokio::test]
    async fn terminal_event_with_no_observers_ends_fan_out() {
        let channel = JobChannel::open(Uuid::new_v4());
        let mut rx = channel.attach(snapshot(JobStatus::Queued)).await;
        let _ = rx.recv().await.unwrap(); // seed
        drop(rx);

        channel.publish(snapshot(JobStatus::Error));

        // Once the fan-out task exits, publishing becomes a no-op.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_job_with_departed_observer_ends_fan_out_on_idle() {
        let channel = JobChannel::open(Uuid::new_v4());
        let mut rx = channel.attach(snapshot(JobStatus::Queued)).await;
        let _ = rx.recv().await.unwrap(); // seed

        // Terminal event delivered while the observer is still attached, so
        // the fan-out task keeps running.
        channel.publish(snapshot(JobStatus::Finished));
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Finished);
        drop(rx);

        // The next idle check prunes the hung-up observer and exits.
        tokio::time::sleep(IDLE_TIMEOUT + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(channel.tx.is_closed());
    }

    #[tokio::test]
    async fn observer_stream_ends_when_channel_dropped() {
        let channel = JobChannel::open(Uuid::new_v4());
        let mut rx = channel.attach(snapshot(JobStatus::Queued)).await;
        let _ = rx.recv().await.unwrap(); // seed

        drop(channel);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn seeded_closed_yields_exactly_one_snapshot() {
        let mut rx = seeded_closed(snapshot(JobStatus::Error));
        let only = rx.recv().await.unwrap();
        assert_eq!(only.status, JobStatus::Error);
        assert!(rx.recv().await.is_none());
    }
}
