//! Shared test fixtures: a scripted extractor standing in for yt-dlp and
//! helpers for driving jobs to completion.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vidgrab::config::Config;
use vidgrab::extract::{
    AuthStrategy, DownloadSpec, ExtractError, MediaExtractor, MediaMetadata, ProgressSink,
    RawFormat, TransferProgress,
};
use vidgrab::state::{Job, JobStore};

/// What the scripted extractor should do on each download attempt.
pub enum Script {
    /// First attempt succeeds.
    Succeed,
    /// Attempts before the given (1-based) one fail; that one succeeds.
    SucceedOnAttempt(usize),
    /// Every attempt fails with a message naming the attempt number.
    FailAll,
    /// Spin until the gate flips to true, then succeed. Cancellation is
    /// honored while spinning.
    BlockUntilReleased(Arc<AtomicBool>),
    /// Spin until cancelled.
    BlockUntilCancelled,
}

pub struct ScriptedExtractor {
    script: Script,
    pub attempts: AtomicUsize,
    /// Size in bytes of the produced file.
    pub payload_size: usize,
}

impl ScriptedExtractor {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            attempts: AtomicUsize::new(0),
            payload_size: 1024,
        })
    }

    pub fn with_payload_size(script: Script, payload_size: usize) -> Arc<Self> {
        Arc::new(Self {
            script,
            attempts: AtomicUsize::new(0),
            payload_size,
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn produce(
        &self,
        spec: &DownloadSpec,
        on_progress: ProgressSink<'_>,
    ) -> Result<PathBuf, ExtractError> {
        on_progress(TransferProgress {
            percent: Some("10.0%".into()),
            speed: Some("1.00MiB/s".into()),
            eta: Some("00:09".into()),
            downloaded_bytes: Some(100),
            total_bytes: Some(self.payload_size as u64),
        });
        on_progress(TransferProgress {
            percent: Some("100.0%".into()),
            speed: None,
            eta: None,
            downloaded_bytes: Some(self.payload_size as u64),
            total_bytes: Some(self.payload_size as u64),
        });

        let path = spec.dest_dir.join("video.webm");
        std::fs::write(&path, vec![0u8; self.payload_size])
            .map_err(|e| ExtractError::Failed(e.to_string()))?;
        Ok(path)
    }
}

impl MediaExtractor for ScriptedExtractor {
    fn probe(&self, _url: &str, _strategy: &AuthStrategy) -> Result<MediaMetadata, ExtractError> {
        Ok(MediaMetadata {
            title: Some("Test Video".into()),
            duration: Some(63.0),
            thumbnail: None,
            formats: vec![
                RawFormat {
                    format_id: Some("22".into()),
                    ext: Some("mp4".into()),
                    height: Some(720),
                    vcodec: Some("avc1.64001F".into()),
                    acodec: Some("mp4a.40.2".into()),
                    tbr: Some(1200.0),
                    ..Default::default()
                },
                RawFormat {
                    format_id: Some("137".into()),
                    ext: Some("mp4".into()),
                    height: Some(1080),
                    fps: Some(30.0),
                    vcodec: Some("avc1.640028".into()),
                    acodec: Some("none".into()),
                    tbr: Some(4400.0),
                    ..Default::default()
                },
            ],
        })
    }

    fn download(
        &self,
        spec: &DownloadSpec,
        _strategy: &AuthStrategy,
        on_progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ExtractError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.script {
            Script::Succeed => self.produce(spec, on_progress),
            Script::SucceedOnAttempt(n) if attempt < *n => {
                Err(ExtractError::Failed(format!("attempt {attempt}")))
            }
            Script::SucceedOnAttempt(_) => self.produce(spec, on_progress),
            Script::FailAll => Err(ExtractError::Failed(format!("attempt {attempt}"))),
            Script::BlockUntilReleased(gate) => {
                while !gate.load(Ordering::SeqCst) {
                    if cancel.is_cancelled() {
                        return Err(ExtractError::Cancelled);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                self.produce(spec, on_progress)
            }
            Script::BlockUntilCancelled => loop {
                if cancel.is_cancelled() {
                    return Err(ExtractError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(5));
            },
        }
    }
}

/// Config pointed at temp directories, with post-processing tools that do
/// not resolve so the stage is a no-op.
pub fn test_config(scratch: &std::path::Path, cookies: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.paths.scratch_dir = scratch.to_path_buf();
    config.paths.cookies_dir = cookies.to_path_buf();
    config.tools.ffmpeg = "vidgrab-test-no-ffmpeg".into();
    config.tools.ffprobe = "vidgrab-test-no-ffprobe".into();
    config
}

/// Drain a subscription until the job hits a terminal state, returning
/// every snapshot seen (seed included).
pub async fn collect_until_terminal(rx: &mut mpsc::Receiver<Job>) -> Vec<Job> {
    let mut seen = Vec::new();
    loop {
        let job = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a job event");
        match job {
            Some(job) => {
                let done = job.status.is_terminal();
                seen.push(job);
                if done {
                    return seen;
                }
            }
            None => return seen,
        }
    }
}

/// Poll the store until the job reaches a terminal state.
pub async fn wait_for_terminal(store: &JobStore, id: Uuid) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(job) = store.get(id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {id} to finish"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
