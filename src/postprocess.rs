//! Compatibility post-processing.
//!
//! After a successful acquisition the output file gets, in order: a
//! faststart remux (MP4 containers only, stream copy, moves the moov atom
//! up front for instant streaming start), then a codec inspection, and a
//! transcode to H.264/AAC when the streams are not already broadly
//! compatible. Every tool invocation writes to a fresh temporary sibling
//! and only replaces the original by atomic rename on confirmed success,
//! so a failed step can never leave the output corrupted. The whole stage
//! is best-effort: callers degrade to the previous path on error and the
//! job still finishes.

use crate::config::ToolsConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

const COMPAT_VIDEO: [&str; 1] = ["h264"];
const COMPAT_AUDIO: [&str; 2] = ["aac", "mp3"];

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("{step} failed: {detail}")]
    StepFailed { step: &'static str, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec identifiers of the first video and audio stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCodecs {
    pub video: Option<String>,
    pub audio: Option<String>,
}

impl StreamCodecs {
    /// Whether a transcode is needed to reach the compatible set.
    ///
    /// Audio-only outputs are left alone: there is no video stream to
    /// re-encode toward H.264.
    pub fn needs_transcode(&self) -> bool {
        let Some(video) = self.video.as_deref() else {
            return false;
        };
        let video_ok = COMPAT_VIDEO.contains(&video);
        let audio_ok = match self.audio.as_deref() {
            Some(c) => COMPAT_AUDIO.contains(&c),
            // No audio stream is fine as-is.
            None => true,
        };
        !(video_ok && audio_ok)
    }

    pub fn audio_compatible(&self) -> bool {
        match self.audio.as_deref() {
            Some(c) => COMPAT_AUDIO.contains(&c),
            None => true,
        }
    }
}

/// Blocking post-processor. All methods are driven from worker threads.
#[derive(Clone)]
pub struct PostProcessor {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl PostProcessor {
    /// Resolve tool binaries once up front. Missing tools downgrade the
    /// whole stage to a no-op rather than failing jobs.
    pub fn new(tools: &ToolsConfig) -> Self {
        let ffmpeg = which::which(&tools.ffmpeg).ok();
        let ffprobe = which::which(&tools.ffprobe).ok();
        if ffmpeg.is_none() {
            tracing::warn!("ffmpeg not found; post-processing disabled");
        }
        Self { ffmpeg, ffprobe }
    }

    /// Run the full compatibility pass, returning the (possibly replaced)
    /// output path.
    pub fn ensure_compatible(&self, input: &Path) -> Result<PathBuf, PostProcessError> {
        let Some(ffmpeg) = self.ffmpeg.clone() else {
            return Ok(input.to_path_buf());
        };

        let mut current = input.to_path_buf();

        if current.extension().and_then(|e| e.to_str()) == Some("mp4") {
            self.remux_faststart(&ffmpeg, &current)?;
        }

        let Some(ffprobe) = self.ffprobe.clone() else {
            // Can't inspect codecs; the remuxed file is the best we can do.
            return Ok(current);
        };
        let codecs = self.inspect_codecs(&ffprobe, &current)?;

        if codecs.needs_transcode() {
            tracing::info!(path = ?current, ?codecs, "transcoding to compatible codecs");
            current = self.transcode(&ffmpeg, &current, &codecs)?;
        }

        Ok(current)
    }

    /// Stream-copy remux with `+faststart`, replacing `input` in place.
    fn remux_faststart(&self, ffmpeg: &Path, input: &Path) -> Result<(), PostProcessError> {
        let temp = temp_output(input);

        let mut cmd = Command::new(ffmpeg);
        cmd.args(["-y", "-i"])
            .arg(input)
            .args(["-c", "copy", "-movflags", "+faststart", "-loglevel", "error"])
            .arg(&temp);
        let result = run_tool(&mut cmd, "faststart remux");

        match result {
            Ok(()) => {
                std::fs::rename(&temp, input)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }

    fn inspect_codecs(&self, ffprobe: &Path, input: &Path) -> Result<StreamCodecs, PostProcessError> {
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "stream=codec_type,codec_name",
                "-of",
                "json",
            ])
            .arg(input)
            .output()
            .map_err(|e| PostProcessError::StepFailed {
                step: "codec inspection",
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PostProcessError::StepFailed {
                step: "codec inspection",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_streams(&output.stdout)
    }

    /// Re-encode video to H.264, copying the audio stream when it is
    /// already compatible. The output container is always MP4.
    fn transcode(
        &self,
        ffmpeg: &Path,
        input: &Path,
        codecs: &StreamCodecs,
    ) -> Result<PathBuf, PostProcessError> {
        let temp = temp_output(input);
        let final_path = input.with_extension("mp4");

        let mut cmd = Command::new(ffmpeg);
        cmd.args(["-y", "-i"])
            .arg(input)
            .args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"]);
        if codecs.audio_compatible() {
            cmd.args(["-c:a", "copy"]);
        } else {
            cmd.args(["-c:a", "aac", "-b:a", "192k"]);
        }
        cmd.args(["-movflags", "+faststart", "-loglevel", "error"])
            .arg(&temp);

        match run_tool(&mut cmd, "transcode") {
            Ok(()) => {
                std::fs::rename(&temp, &final_path)?;
                if final_path != input {
                    let _ = std::fs::remove_file(input);
                }
                Ok(final_path)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }
}

/// Temporary sibling for a tool's output: `video.mp4` -> `video.tmp.mp4`.
/// Staying in the same directory keeps the final rename atomic.
fn temp_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input.with_file_name(format!("{stem}.tmp.mp4"))
}

fn run_tool(cmd: &mut Command, step: &'static str) -> Result<(), PostProcessError> {
    let output = cmd.output().map_err(|e| PostProcessError::StepFailed {
        step,
        detail: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(PostProcessError::StepFailed {
            step,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
}

fn parse_streams(json: &[u8]) -> Result<StreamCodecs, PostProcessError> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(json).map_err(|e| PostProcessError::StepFailed {
            step: "codec inspection",
            detail: e.to_string(),
        })?;

    let mut codecs = StreamCodecs::default();
    for stream in parsed.streams {
        match stream.codec_type.as_deref() {
            Some("video") if codecs.video.is_none() => codecs.video = stream.codec_name,
            Some("audio") if codecs.audio.is_none() => codecs.audio = stream.codec_name,
            _ => {}
        }
    }
    Ok(codecs)
}
