use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Largest acceptable output file, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Acquisition workers allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Jobs older than this are evicted together with their files.
    #[serde(default = "default_job_ttl_hours")]
    pub job_ttl_hours: u64,

    /// Admission quota per client address per rolling minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Interval between reaper scans.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Grace delay between a successful fetch and job removal.
    #[serde(default = "default_fetch_grace")]
    pub fetch_grace_secs: u64,
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_max_concurrent() -> usize {
    3
}
fn default_job_ttl_hours() -> u64 {
    24
}
fn default_rate_limit() -> u32 {
    10
}
fn default_reaper_interval() -> u64 {
    3600
}
fn default_fetch_grace() -> u64 {
    60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_concurrent_downloads: default_max_concurrent(),
            job_ttl_hours: default_job_ttl_hours(),
            rate_limit_per_minute: default_rate_limit(),
            reaper_interval_secs: default_reaper_interval(),
            fetch_grace_secs: default_fetch_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Domains downloads may be requested from. Subdomains of an entry
    /// are allowed.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
}

fn default_allowed_domains() -> Vec<String> {
    [
        "youtube.com",
        "youtu.be",
        "instagram.com",
        "tiktok.com",
        "twitter.com",
        "x.com",
        "vimeo.com",
        "dailymotion.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_domains: default_allowed_domains(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Root for per-job scratch directories.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Directory searched for a `cookies.txt` credential file.
    #[serde(default = "default_cookies_dir")]
    pub cookies_dir: PathBuf,
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp/vidgrab")
}
fn default_cookies_dir() -> PathBuf {
    PathBuf::from("./cookies")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            cookies_dir: default_cookies_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// yt-dlp binary name or path.
    #[serde(default = "default_ytdlp")]
    pub ytdlp: String,

    /// ffmpeg binary name or path.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    /// ffprobe binary name or path.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_ytdlp() -> String {
    "yt-dlp".to_string()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp: default_ytdlp(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}
