//! Format probing.
//!
//! Turns the extractor's raw format dump into the descriptors the client
//! picks from: classified by stream kind, labeled for humans, carrying the
//! selector string a later download submits back. Audio-only and data
//! formats are filtered out; video-only formats get a selector that merges
//! in the best available audio.

use crate::extract::{MediaMetadata, RawFormat};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// Muxed audio+video.
    Av,
    Video,
    Audio,
    Other,
}

/// One selectable download format.
#[derive(Debug, Clone, Serialize)]
pub struct FormatDescriptor {
    pub id: String,
    pub kind: FormatKind,
    pub label: String,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub fps: Option<u32>,
    pub height: Option<u32>,
    pub tbr: Option<u64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// The selector string to submit for this format.
    pub selector: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeMeta {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

/// Result of probing a URL: asset metadata plus selectable formats.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub meta: ProbeMeta,
    pub formats: Vec<FormatDescriptor>,
}

pub fn build_report(info: MediaMetadata) -> ProbeReport {
    let mut formats: Vec<FormatDescriptor> = info
        .formats
        .iter()
        .filter_map(describe_format)
        .collect();

    // Muxed formats first, then highest resolution, then highest bitrate.
    formats.sort_by(|a, b| {
        let rank = |f: &FormatDescriptor| {
            (
                if f.kind == FormatKind::Av { 0 } else { 1 },
                std::cmp::Reverse(f.height.unwrap_or(0)),
                std::cmp::Reverse(f.tbr.unwrap_or(0)),
            )
        };
        rank(a).cmp(&rank(b))
    });

    ProbeReport {
        meta: ProbeMeta {
            title: info.title,
            duration: info.duration,
            thumbnail: info.thumbnail,
        },
        formats,
    }
}

fn describe_format(raw: &RawFormat) -> Option<FormatDescriptor> {
    let id = raw.format_id.clone()?;
    let kind = classify(raw);

    // Audio-only and data tracks are not individually selectable.
    if !matches!(kind, FormatKind::Av | FormatKind::Video) {
        return None;
    }

    let selector = match kind {
        // Video-only streams get best audio merged in.
        FormatKind::Video => format!("{id}+bestaudio[ext=m4a]/bestaudio"),
        _ => id.clone(),
    };

    let resolution = match (raw.width, raw.height) {
        (Some(w), Some(h)) => Some(format!("{w}x{h}")),
        _ => None,
    };

    Some(FormatDescriptor {
        label: build_label(raw),
        id,
        kind,
        ext: raw.ext.clone(),
        resolution,
        fps: raw.fps.map(|f| f as u32),
        height: raw.height,
        tbr: raw.tbr.map(|t| t.round() as u64),
        vcodec: raw.vcodec.clone(),
        acodec: raw.acodec.clone(),
        selector,
    })
}

fn has_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| c != "none")
}

fn classify(raw: &RawFormat) -> FormatKind {
    match (has_codec(&raw.vcodec), has_codec(&raw.acodec)) {
        (true, true) => FormatKind::Av,
        (true, false) => FormatKind::Video,
        (false, true) => FormatKind::Audio,
        (false, false) => FormatKind::Other,
    }
}

fn build_label(raw: &RawFormat) -> String {
    let mut parts: Vec<String> = Vec::new();

    match classify(raw) {
        FormatKind::Av => parts.push("AV".into()),
        FormatKind::Video => parts.push("VIDEO".into()),
        FormatKind::Audio => parts.push("AUDIO".into()),
        FormatKind::Other => {}
    }

    if let Some(height) = raw.height {
        parts.push(format!("{height}p"));
    }
    if let Some(fps) = raw.fps {
        parts.push(format!("{}fps", fps as u32));
    }
    if let Some(ext) = &raw.ext {
        parts.push(ext.to_uppercase());
    }
    if let Some(tbr) = raw.tbr {
        parts.push(format!("{}k", tbr.round() as u64));
    }
    if let Some(size) = raw.filesize.or(raw.filesize_approx) {
        parts.push(format!("~{}", human_size(size)));
    }

    parts.join(" \u{2022} ")
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_only(id: &str, height: u32, tbr: f64) -> RawFormat {
        RawFormat {
            format_id: Some(id.to_string()),
            ext: Some("mp4".into()),
            width: Some(height * 16 / 9),
            height: Some(height),
            fps: Some(30.0),
            tbr: Some(tbr),
            vcodec: Some("avc1.640028".into()),
            acodec: Some("none".into()),
            filesize: Some(50 * 1024 * 1024),
            filesize_approx: None,
        }
    }

    fn muxed(id: &str, height: u32) -> RawFormat {
        RawFormat {
            vcodec: Some("avc1.640028".into()),
            acodec: Some("mp4a.40.2".into()),
            ..video_only(id, height, 500.0)
        }
    }

    fn audio_only(id: &str) -> RawFormat {
        RawFormat {
            format_id: Some(id.to_string()),
            ext: Some("m4a".into()),
            vcodec: Some("none".into()),
            acodec: Some("mp4a.40.2".into()),
            ..RawFormat::default()
        }
    }

    #[test]
    fn classifies_stream_kinds() {
        assert_eq!(classify(&muxed("22", 720)), FormatKind::Av);
        assert_eq!(classify(&video_only("137", 1080, 4000.0)), FormatKind::Video);
        assert_eq!(classify(&audio_only("140")), FormatKind::Audio);
        assert_eq!(classify(&RawFormat::default()), FormatKind::Other);
    }

    #[test]
    fn video_only_selector_merges_best_audio() {
        let info = MediaMetadata {
            formats: vec![video_only("137", 1080, 4000.0)],
            ..Default::default()
        };
        let report = build_report(info);
        assert_eq!(
            report.formats[0].selector,
            "137+bestaudio[ext=m4a]/bestaudio"
        );
    }

    #[test]
    fn muxed_selector_is_bare_id() {
        let info = MediaMetadata {
            formats: vec![muxed("22", 720)],
            ..Default::default()
        };
        let report = build_report(info);
        assert_eq!(report.formats[0].selector, "22");
    }

    #[test]
    fn audio_and_unidentified_formats_are_dropped() {
        let info = MediaMetadata {
            formats: vec![
                audio_only("140"),
                RawFormat::default(), // no format_id
                muxed("22", 720),
            ],
            ..Default::default()
        };
        let report = build_report(info);
        assert_eq!(report.formats.len(), 1);
        assert_eq!(report.formats[0].id, "22");
    }

    #[test]
    fn sorted_av_first_then_height_then_bitrate() {
        let info = MediaMetadata {
            formats: vec![
                video_only("137", 1080, 4000.0),
                muxed("18", 360),
                video_only("248", 1080, 5000.0),
                video_only("136", 720, 2500.0),
            ],
            ..Default::default()
        };
        let ids: Vec<String> = build_report(info).formats.into_iter().map(|f| f.id).collect();
        assert_eq!(ids, ["18", "248", "137", "136"]);
    }

    #[test]
    fn label_contains_the_essentials() {
        let label = build_label(&video_only("137", 1080, 4321.4));
        assert!(label.starts_with("VIDEO"));
        assert!(label.contains("1080p"));
        assert!(label.contains("30fps"));
        assert!(label.contains("MP4"));
        assert!(label.contains("4321k"));
        assert!(label.contains("50.0 MB"));
    }

    #[test]
    fn human_size_scales_units() {
        assert_eq!(human_size(512), "512.0 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(2 * 1024 * 1024 * 1024), "2.0 GB");
    }
}
