//! yt-dlp subprocess extractor.
//!
//! Probing runs `yt-dlp -J` and parses the JSON dump; downloading runs with
//! `--newline` and a fixed `--progress-template` so progress can be parsed
//! line by line off the child's stdout while it is still running.

use super::{
    AuthStrategy, DownloadSpec, ExtractError, MediaExtractor, MediaMetadata, ProgressSink,
    TransferProgress,
};
use regex::Regex;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

/// Progress lines are prefixed so they can be told apart from everything
/// else yt-dlp prints on stdout.
const PROGRESS_PREFIX: &str = "PROGRESS|";

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("static regex"));

/// Output extensions tried, in preference order, when resolving the file
/// the extractor produced.
const KNOWN_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "webm", "m4a", "mp3"];

pub struct YtDlpExtractor {
    binary: PathBuf,
    user_agent: String,
}

impl YtDlpExtractor {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
        }
    }

    /// Options shared by probe and download invocations.
    fn base_args(&self) -> Vec<String> {
        vec![
            "--quiet".into(),
            "--no-playlist".into(),
            "--user-agent".into(),
            self.user_agent.clone(),
            "--add-headers".into(),
            "Accept-Language:en-US,en;q=0.9".into(),
        ]
    }

    fn strategy_args(strategy: &AuthStrategy) -> Vec<String> {
        match strategy {
            AuthStrategy::CookieFile(path) => {
                vec!["--cookies".into(), path.to_string_lossy().into_owned()]
            }
            AuthStrategy::BrowserCookies(browser) => {
                vec!["--cookies-from-browser".into(), browser.clone()]
            }
            AuthStrategy::Anonymous => Vec::new(),
        }
    }
}

impl MediaExtractor for YtDlpExtractor {
    fn probe(&self, url: &str, strategy: &AuthStrategy) -> Result<MediaMetadata, ExtractError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.base_args())
            .args(Self::strategy_args(strategy))
            .arg("-J")
            .arg(url)
            .stdin(Stdio::null());

        let output = cmd.output().map_err(|source| ExtractError::Launch {
            tool: self.binary.to_string_lossy().into_owned(),
            source,
        })?;

        if !output.status.success() {
            return Err(ExtractError::Failed(last_stderr_line(&output.stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::Metadata(e.to_string()))
    }

    fn download(
        &self,
        spec: &DownloadSpec,
        strategy: &AuthStrategy,
        on_progress: ProgressSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ExtractError> {
        let template = format!(
            "download:{PROGRESS_PREFIX}%(progress._percent_str)s|%(progress._speed_str)s|\
             %(progress._eta_str)s|%(progress.downloaded_bytes)s|%(progress.total_bytes_estimate)s"
        );
        let outtmpl = spec.dest_dir.join("%(title)s.%(ext)s");

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.base_args())
            .args(Self::strategy_args(strategy))
            .arg("-f")
            .arg(&spec.selector)
            .arg("-o")
            .arg(&outtmpl)
            .args(["--merge-output-format", "mp4"])
            .arg("--newline")
            .arg("--progress-template")
            .arg(&template)
            .arg(&spec.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| ExtractError::Launch {
            tool: self.binary.to_string_lossy().into_owned(),
            source,
        })?;

        let stdout = child.stdout.take().expect("stdout piped");
        for line in BufReader::new(stdout).lines() {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractError::Cancelled);
            }
            let Ok(line) = line else { break };
            if let Some(progress) = parse_progress_line(&line) {
                on_progress(progress);
            }
        }

        let mut stderr_buf = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let _ = stderr.read_to_string(&mut stderr_buf);
        }
        let status = child.wait().map_err(|source| ExtractError::Launch {
            tool: self.binary.to_string_lossy().into_owned(),
            source,
        })?;

        if cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        if !status.success() {
            return Err(ExtractError::Failed(last_stderr_line(stderr_buf.as_bytes())));
        }

        resolve_output(&spec.dest_dir)
    }
}

/// Parse one `--progress-template` line into a progress sample.
fn parse_progress_line(line: &str) -> Option<TransferProgress> {
    let line = ANSI_ESCAPE.replace_all(line, "");
    let payload = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = payload.split('|');

    Some(TransferProgress {
        percent: clean_field(fields.next()),
        speed: clean_field(fields.next()),
        eta: clean_field(fields.next()),
        downloaded_bytes: fields.next().and_then(parse_count),
        total_bytes: fields.next().and_then(parse_count),
    })
}

fn clean_field(field: Option<&str>) -> Option<String> {
    let value = field?.trim();
    if value.is_empty() || value == "NA" {
        return None;
    }
    Some(value.to_string())
}

/// yt-dlp prints byte counts as integers, floats, or `NA`.
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    raw.parse::<f64>().ok().map(|f| f as u64)
}

/// Find the file yt-dlp produced inside the scratch directory.
///
/// The merged output's final name is not reported on stdout, so prefer
/// known media extensions and fall back to any file present.
fn resolve_output(dest_dir: &Path) -> Result<PathBuf, ExtractError> {
    let entries: Vec<PathBuf> = std::fs::read_dir(dest_dir)
        .map_err(|e| ExtractError::Failed(format!("scratch dir unreadable: {e}")))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();

    for ext in KNOWN_EXTENSIONS {
        if let Some(path) = entries
            .iter()
            .find(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        {
            return Ok(path.clone());
        }
    }

    entries.into_iter().next().ok_or(ExtractError::MissingOutput)
}

fn last_stderr_line(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("extractor failed with no diagnostics")
        .to_string()
}
