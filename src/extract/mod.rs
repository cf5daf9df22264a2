//! External extractor seam.
//!
//! The actual acquisition logic lives behind [`MediaExtractor`]: given a URL
//! and a format selector it produces a local file, reporting transfer
//! progress through a side-channel callback. Implementations are blocking
//! and are always driven from a worker thread, never from the async
//! scheduler. The production implementation shells out to yt-dlp
//! ([`ytdlp::YtDlpExtractor`]); tests substitute scripted fakes.

pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One credential source to attempt an extraction with.
///
/// Opaque to the orchestration core: the runner only owns the ordering of
/// attempts and the fallback-on-failure policy, never the contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Netscape-format cookies file on disk.
    CookieFile(PathBuf),
    /// Cookies lifted from an installed browser profile.
    BrowserCookies(String),
    /// No credentials at all.
    Anonymous,
}

impl fmt::Display for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::CookieFile(path) => write!(f, "cookie file {}", path.display()),
            AuthStrategy::BrowserCookies(browser) => write!(f, "{browser} cookies"),
            AuthStrategy::Anonymous => write!(f, "no credentials"),
        }
    }
}

/// A transfer progress sample, as reported by the extractor.
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    pub percent: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
}

/// Progress callback. Fired from the extractor's (blocking) thread.
pub type ProgressSink<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

/// What to acquire and where to put it.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub url: String,
    pub selector: String,
    /// Scratch directory exclusively owned by the job.
    pub dest_dir: PathBuf,
}

/// Raw metadata returned by a probe, before format classification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// One format entry as the extractor reports it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub tbr: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),

    #[error("metadata parse error: {0}")]
    Metadata(String),

    #[error("no output file produced")]
    MissingOutput,

    #[error("cancelled")]
    Cancelled,
}

/// Blocking acquisition collaborator.
pub trait MediaExtractor: Send + Sync {
    /// Extract metadata and the available formats without downloading.
    fn probe(&self, url: &str, strategy: &AuthStrategy) -> Result<MediaMetadata, ExtractError>;

    /// Download the asset, reporting progress through `on_progress`.
    /// Returns the path of the produced file inside `spec.dest_dir`.
    fn download(
        &self,
        spec: &DownloadSpec,
        strategy: &AuthStrategy,
        on_progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ExtractError>;
}
