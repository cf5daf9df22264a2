use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One tracked acquisition request and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    /// Transfer snapshot, meaningful only while downloading.
    pub progress: Option<Progress>,
    /// Set exactly once, on the transition into `Finished`.
    pub result: Option<JobResult>,
    /// Set exactly once, on the transition into `Error`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Starting,
    Downloading,
    Postprocessing,
    Finished,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Forward edges only: queued -> starting -> downloading ->
    /// postprocessing -> finished, with error/cancelled reachable from any
    /// non-terminal state. Progress updates re-enter `Downloading`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Queued => false,
            JobStatus::Starting => *self == JobStatus::Queued,
            JobStatus::Downloading => {
                matches!(self, JobStatus::Starting | JobStatus::Downloading)
            }
            // The extractor may return before the first progress callback
            // fires, so postprocessing is reachable from any active state.
            JobStatus::Postprocessing => true,
            JobStatus::Finished => *self == JobStatus::Postprocessing,
            JobStatus::Error | JobStatus::Cancelled => true,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Postprocessing => "postprocessing",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Immutable transfer snapshot reported by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub percent: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
}

/// Location of a finished job's output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub file_path: PathBuf,
    pub file_name: String,
}

/// Closed set of partial updates applied through [`super::JobStore::update`].
///
/// Each variant carries exactly the fields its transition is allowed to
/// touch; there is no way to poke arbitrary fields on a job record.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// Plain status change with no payload.
    Status(JobStatus),
    /// Transfer progress; implies `Downloading`.
    Progress(Progress),
    /// Successful completion; implies `Finished`.
    Result(JobResult),
    /// Unrecoverable failure; implies `Error`.
    Error(String),
}

impl JobUpdate {
    /// The status this update transitions the job into.
    pub fn status(&self) -> JobStatus {
        match self {
            JobUpdate::Status(status) => *status,
            JobUpdate::Progress(_) => JobStatus::Downloading,
            JobUpdate::Result(_) => JobStatus::Finished,
            JobUpdate::Error(_) => JobStatus::Error,
        }
    }
}

impl Job {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Queued,
            progress: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, refusing transitions the state machine does
    /// not permit. Returns whether the update was applied.
    pub fn apply(&mut self, update: JobUpdate) -> bool {
        if !self.status.can_transition_to(update.status()) {
            return false;
        }

        match update {
            JobUpdate::Status(status) => {
                self.status = status;
            }
            JobUpdate::Progress(progress) => {
                self.status = JobStatus::Downloading;
                self.progress = Some(progress);
            }
            JobUpdate::Result(result) => {
                self.status = JobStatus::Finished;
                self.result = Some(result);
            }
            JobUpdate::Error(message) => {
                self.status = JobStatus::Error;
                self.error = Some(message);
            }
        }
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(Uuid::new_v4())
    }

    #[test]
    fn test_new_job_is_queued() {
        let j = job();
        assert_eq!(j.status, JobStatus::Queued);
        assert!(j.progress.is_none());
        assert!(j.result.is_none());
        assert!(j.error.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut j = job();
        assert!(j.apply(JobUpdate::Status(JobStatus::Starting)));
        assert!(j.apply(JobUpdate::Progress(Progress::default())));
        assert!(j.apply(JobUpdate::Progress(Progress::default())));
        assert!(j.apply(JobUpdate::Status(JobStatus::Postprocessing)));
        assert!(j.apply(JobUpdate::Result(JobResult {
            file_path: PathBuf::from("/tmp/x/video.mp4"),
            file_name: "video.mp4".into(),
        })));
        assert_eq!(j.status, JobStatus::Finished);
        assert!(j.result.is_some());
        assert!(j.error.is_none());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let mut j = job();
        assert!(j.apply(JobUpdate::Error("boom".into())));
        assert_eq!(j.status, JobStatus::Error);

        assert!(!j.apply(JobUpdate::Status(JobStatus::Starting)));
        assert!(!j.apply(JobUpdate::Progress(Progress::default())));
        assert!(!j.apply(JobUpdate::Result(JobResult {
            file_path: PathBuf::from("/tmp/a"),
            file_name: "a".into(),
        })));
        assert!(!j.apply(JobUpdate::Status(JobStatus::Cancelled)));
        assert_eq!(j.status, JobStatus::Error);
        assert!(j.result.is_none(), "error job must never gain a result");
    }

    #[test]
    fn test_cancel_from_any_active_state() {
        for setup in [
            vec![],
            vec![JobUpdate::Status(JobStatus::Starting)],
            vec![
                JobUpdate::Status(JobStatus::Starting),
                JobUpdate::Progress(Progress::default()),
            ],
        ] {
            let mut j = job();
            for u in setup {
                assert!(j.apply(u));
            }
            assert!(j.apply(JobUpdate::Status(JobStatus::Cancelled)));
            assert!(j.status.is_terminal());
        }
    }

    #[test]
    fn test_cannot_regress_to_queued() {
        let mut j = job();
        assert!(j.apply(JobUpdate::Status(JobStatus::Starting)));
        assert!(!j.apply(JobUpdate::Status(JobStatus::Queued)));
    }

    #[test]
    fn test_finished_requires_postprocessing() {
        let mut j = job();
        assert!(j.apply(JobUpdate::Status(JobStatus::Starting)));
        assert!(!j.apply(JobUpdate::Result(JobResult {
            file_path: PathBuf::from("/tmp/a"),
            file_name: "a".into(),
        })));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let s = serde_json::to_string(&JobStatus::Postprocessing).unwrap();
        assert_eq!(s, "\"postprocessing\"");
    }
}
