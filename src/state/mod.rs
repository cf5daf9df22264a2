//! In-memory job record store.
//!
//! Holds the current state of every known job, guarded by a single lock.
//! Mutations flow through [`JobStore::update`] with a closed set of
//! [`JobUpdate`] variants; every applied update is pushed onto the job's
//! broadcast channel so live observers see each transition. Job state is
//! ephemeral: nothing survives a process restart.

mod types;

pub use types::*;

use crate::broadcast::{self, JobChannel};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    channels: RwLock<HashMap<Uuid, JobChannel>>,
    /// Root of the per-job scratch directories. A backing file under this
    /// root means its parent directory belongs exclusively to the job and
    /// is removed as a unit.
    scratch_root: PathBuf,
}

impl JobStore {
    pub fn new(scratch_root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            scratch_root,
        })
    }

    /// Create a new job record in the `queued` state and open its
    /// broadcast channel.
    pub fn create(&self, id: Uuid) -> Job {
        let job = Job::new(id);
        self.jobs.write().insert(id, job.clone());
        self.channels.write().insert(id, JobChannel::open(id));
        job
    }

    /// Snapshot read of a job record.
    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Apply a partial update and broadcast the resulting snapshot.
    ///
    /// Returns `false` without side effects when the job no longer exists
    /// or the state machine refuses the transition.
    pub fn update(&self, id: Uuid, update: JobUpdate) -> bool {
        let snapshot = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(&id) else {
                return false;
            };
            let requested = update.status();
            if !job.apply(update) {
                tracing::warn!(
                    %id,
                    from = ?job.status,
                    to = ?requested,
                    "refusing illegal job transition"
                );
                return false;
            }
            job.clone()
        };

        if let Some(channel) = self.channels.read().get(&id) {
            channel.publish(snapshot);
        }
        true
    }

    /// Move a job into `cancelled` if it has not already reached a
    /// terminal state.
    pub fn cancel(&self, id: Uuid) -> bool {
        self.update(id, JobUpdate::Status(JobStatus::Cancelled))
    }

    /// Remove a job record, closing its broadcast channel and deleting its
    /// backing file. Cleanup failures are logged and swallowed.
    pub fn remove(&self, id: Uuid) {
        let job = self.jobs.write().remove(&id);
        // Dropping the channel closes the event stream; the fan-out task
        // drains and ends every observer's stream.
        self.channels.write().remove(&id);

        if let Some(job) = job {
            self.delete_backing_file(&job);
        }
    }

    /// Subscribe to a job's progress stream.
    ///
    /// The returned receiver is seeded with the current snapshot. For a job
    /// already in a terminal state the stream holds exactly that snapshot
    /// and then ends.
    pub async fn subscribe(&self, id: Uuid) -> Option<mpsc::Receiver<Job>> {
        let snapshot = self.get(id)?;
        if snapshot.status.is_terminal() {
            return Some(broadcast::seeded_closed(snapshot));
        }

        // Clone the channel handle out so the lock is not held across the
        // attach await point.
        let channel = self.channels.read().get(&id).cloned();
        match channel {
            Some(channel) => Some(channel.attach(snapshot).await),
            None => Some(broadcast::seeded_closed(snapshot)),
        }
    }

    /// Ids of jobs older than `ttl`, by creation time.
    pub fn expired_ids(&self, ttl: chrono::Duration) -> Vec<Uuid> {
        let cutoff = chrono::Utc::now() - ttl;
        self.jobs
            .read()
            .values()
            .filter(|job| job.created_at < cutoff)
            .map(|job| job.id)
            .collect()
    }

    /// Best-effort deletion of every tracked backing file. Used once at
    /// process shutdown.
    pub fn purge_files(&self) {
        for job in self.list() {
            self.delete_backing_file(&job);
        }
    }

    fn delete_backing_file(&self, job: &Job) {
        let Some(result) = &job.result else {
            return;
        };
        if !result.file_path.exists() {
            return;
        }

        if let Err(e) = remove_scratch(&result.file_path, &self.scratch_root) {
            tracing::warn!(id = %job.id, path = ?result.file_path, "cleanup failed: {e}");
        }
    }
}

/// Delete a job's output. Files inside the scratch root take their whole
/// containing directory with them; anything else is removed on its own.
pub fn remove_scratch(file_path: &Path, scratch_root: &Path) -> std::io::Result<()> {
    match file_path.parent() {
        Some(parent) if parent.starts_with(scratch_root) && parent != scratch_root => {
            std::fs::remove_dir_all(parent)
        }
        _ => std::fs::remove_file(file_path),
    }
}
