//! Acquisition strategy runner.
//!
//! Turns a blocking, multi-strategy extraction into a cancellable,
//! observable background job. One runner task per job: it waits for a
//! concurrency permit, offloads the extractor onto the blocking thread
//! pool, feeds progress callbacks through a channel back into the job
//! store (single consumer, preserving single-writer-per-job), runs the
//! compatibility post-processor, enforces the size limit, and cleans up
//! the scratch directory on every failure path.

mod strategies;

pub use strategies::{run_with_fallback, strategy_chain};

use crate::config::Config;
use crate::error::Error;
use crate::extract::{DownloadSpec, ExtractError, MediaExtractor, TransferProgress};
use crate::postprocess::PostProcessor;
use crate::state::{JobResult, JobStatus, JobStore, JobUpdate, Progress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct DownloadRunner {
    store: Arc<JobStore>,
    extractor: Arc<dyn MediaExtractor>,
    post: PostProcessor,
    semaphore: Arc<Semaphore>,
    config: Arc<Config>,
    cancel_tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl DownloadRunner {
    pub fn new(
        store: Arc<JobStore>,
        extractor: Arc<dyn MediaExtractor>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            extractor,
            post: PostProcessor::new(&config.tools),
            semaphore: Arc::new(Semaphore::new(config.limits.max_concurrent_downloads)),
            config,
            cancel_tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Schedule the background acquisition for an already-created job.
    /// Returns immediately; the job stays `queued` until a permit frees up.
    pub fn spawn(self: &Arc<Self>, job_id: Uuid, url: String, selector: String) -> JoinHandle<()> {
        let token = CancellationToken::new();
        self.cancel_tokens.lock().insert(job_id, token.clone());

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run(job_id, url, selector, token).await;
            runner.cancel_tokens.lock().remove(&job_id);
        })
    }

    /// Cancel a job: marks the record `cancelled` (when not already
    /// terminal) and fires the runner's cancellation token.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let cancelled = self.store.cancel(job_id);
        if let Some(token) = self.cancel_tokens.lock().get(&job_id) {
            token.cancel();
        }
        cancelled
    }

    /// Number of permits currently available (test hook).
    #[cfg(test)]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn run(&self, job_id: Uuid, url: String, selector: String, token: CancellationToken) {
        // Hold exactly one permit for the entire blocking duration. The
        // permit is dropped on every exit path of this function.
        let _permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_closed) => return,
        };

        if token.is_cancelled() {
            // Cancelled while still queued; the record is already terminal.
            return;
        }
        if !self
            .store
            .update(job_id, JobUpdate::Status(JobStatus::Starting))
        {
            // Record gone or already terminal.
            return;
        }

        match self.acquire(job_id, url, selector, token).await {
            Ok(result) => {
                if self.store.update(job_id, JobUpdate::Result(result.clone())) {
                    tracing::info!(%job_id, path = ?result.file_path, "download finished");
                } else {
                    // Cancelled or evicted after the scratch directory was
                    // already kept; the record will never carry the result,
                    // so nothing else can reclaim the files.
                    tracing::debug!(%job_id, "discarding result for inactive job");
                    if let Err(e) = crate::state::remove_scratch(
                        &result.file_path,
                        &self.config.paths.scratch_dir,
                    ) {
                        tracing::warn!(
                            %job_id,
                            path = ?result.file_path,
                            "cleanup of discarded result failed: {e}"
                        );
                    }
                }
            }
            Err(Error::Extraction(_)) if self.store.get(job_id).is_some_and(|j| j.status == JobStatus::Cancelled) => {
                // Lost the race against an explicit cancel; nothing to record.
            }
            Err(e) => {
                tracing::warn!(%job_id, "download failed: {e}");
                self.store.update(job_id, JobUpdate::Error(e.to_string()));
            }
        }
    }

    async fn acquire(
        &self,
        job_id: Uuid,
        url: String,
        selector: String,
        token: CancellationToken,
    ) -> Result<JobResult, Error> {
        std::fs::create_dir_all(&self.config.paths.scratch_dir)?;
        // The scratch directory is exclusively owned by this job. Dropping
        // the handle removes it, which is exactly what every error path
        // wants; the success path defuses it with `keep()`.
        let scratch = tempfile::Builder::new()
            .prefix("grab_")
            .tempdir_in(&self.config.paths.scratch_dir)?;

        // Progress hand-off: the extractor fires callbacks on its worker
        // thread; a single consumer task owned by the scheduler applies
        // them to the store, preserving one writer per job.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<TransferProgress>();
        let progress_store = Arc::clone(&self.store);
        let consumer = tokio::spawn(async move {
            while let Some(sample) = progress_rx.recv().await {
                progress_store.update(
                    job_id,
                    JobUpdate::Progress(Progress {
                        percent: sample.percent,
                        speed: sample.speed,
                        eta: sample.eta,
                        downloaded_bytes: sample.downloaded_bytes,
                        total_bytes: sample.total_bytes,
                    }),
                );
            }
        });

        let spec = DownloadSpec {
            url,
            selector,
            dest_dir: scratch.path().to_path_buf(),
        };
        let chain = strategy_chain(&self.config.paths.cookies_dir);
        let extractor = Arc::clone(&self.extractor);
        let blocking_token = token.clone();

        let downloaded = tokio::task::spawn_blocking(move || {
            run_with_fallback(&chain, |strategy| {
                if blocking_token.is_cancelled() {
                    return Err(ExtractError::Cancelled);
                }
                tracing::debug!(%strategy, "attempting extraction");
                extractor.download(
                    &spec,
                    strategy,
                    &|sample| {
                        // Best-effort: if the consumer is gone, drop the
                        // sample rather than stall the worker thread.
                        let _ = progress_tx.send(sample);
                    },
                    &blocking_token,
                )
            })
        })
        .await;

        // The extractor (and its sender clone) is done; drain remaining
        // progress updates before making further transitions so observers
        // see them in production order.
        let _ = consumer.await;

        let file_path = match downloaded {
            Ok(Ok(path)) => path,
            Ok(Err(ExtractError::Cancelled)) => {
                self.store
                    .update(job_id, JobUpdate::Status(JobStatus::Cancelled));
                return Err(Error::extraction("cancelled"));
            }
            Ok(Err(e)) => return Err(Error::extraction(e.to_string())),
            Err(join_err) => return Err(Error::extraction(join_err.to_string())),
        };

        if !self
            .store
            .update(job_id, JobUpdate::Status(JobStatus::Postprocessing))
        {
            return Err(Error::extraction("job no longer active"));
        }

        // Post-processing is best-effort: on failure keep the file the
        // extractor produced and still finish the job.
        let post_input = file_path.clone();
        let processed = tokio::task::spawn_blocking({
            let post = self.post.clone();
            move || post.ensure_compatible(&post_input)
        })
        .await;
        let final_path = match processed {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                tracing::warn!(%job_id, "post-processing failed, keeping original: {e}");
                file_path
            }
            Err(join_err) => {
                tracing::warn!(%job_id, "post-processing panicked, keeping original: {join_err}");
                file_path
            }
        };

        let size = std::fs::metadata(&final_path)?.len();
        if size > self.config.limits.max_file_size {
            return Err(Error::SizeLimitExceeded {
                size,
                limit: self.config.limits.max_file_size,
            });
        }

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());

        // Success: the scratch directory now outlives this task. It is
        // reclaimed on fetch, by the reaper, or at shutdown.
        let _ = scratch.keep();

        Ok(JobResult {
            file_path: final_path,
            file_name,
        })
    }
}
