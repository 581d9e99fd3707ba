//! FFprobe-based media metadata. The engine never probes by itself; it is
//! handed a [`MediaInfo`] produced here (or by any other collaborator that
//! can fill one in).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoders::ColorInfo;
use crate::error::AppError;
use crate::units::{Bitrate, Resolution, secs, secs_opt};

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    color_primaries: Option<String>,
    #[serde(default)]
    color_transfer: Option<String>,
    #[serde(default)]
    color_space: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 2 {
        return None;
    }
    let num: f64 = parts[0].trim().parse().ok()?;
    let den: f64 = parts[1].trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_bit_rate(s: &str) -> Option<Bitrate> {
    s.trim().parse().ok().map(Bitrate::from_bps)
}

/// One audio stream of the source, in stream order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackInfo {
    /// Index among the source's audio streams (0-based), not the container
    /// stream index.
    pub index: u32,
    pub codec_name: Option<String>,
    pub bitrate: Option<Bitrate>,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
}

/// Everything the engine needs to know about a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub path: PathBuf,
    #[serde(with = "secs")]
    pub duration: Duration,
    pub framerate: f64,
    pub resolution: Resolution,
    pub video_codec: Option<String>,
    pub video_bitrate: Option<Bitrate>,
    pub container: Option<String>,
    pub audio_tracks: Vec<AudioTrackInfo>,
    pub subtitle_stream_count: u32,
    pub color: Option<ColorInfo>,
    /// Set when the audio lives in a separate file (e.g. a downloaded
    /// stream pair); the engine adds it as a second input.
    pub external_audio_path: Option<PathBuf>,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty() || self.external_audio_path.is_some()
    }
}

/// Parse ffprobe JSON output into [`MediaInfo`]. Absent fields degrade to
/// defaults rather than failing the probe.
pub fn parse_ffprobe_json(path: &Path, json: &str) -> Result<MediaInfo, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| AppError::from(format!("Failed to parse ffprobe JSON: {}", e)))?;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::ZERO);
    let container = format.and_then(|f| f.format_name.clone());
    let format_bitrate = format.and_then(|f| f.bit_rate.as_deref()).and_then(parse_bit_rate);

    let streams = output.streams.unwrap_or_default();
    let video_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let resolution = Resolution::new(
        video_stream.and_then(|s| s.width).unwrap_or(0),
        video_stream.and_then(|s| s.height).unwrap_or(0),
    );
    let framerate = video_stream
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);
    let video_codec = video_stream.and_then(|s| s.codec_name.clone());
    let video_bitrate = video_stream
        .and_then(|s| s.bit_rate.as_deref())
        .and_then(parse_bit_rate)
        .or(format_bitrate);

    let color = video_stream.and_then(|s| {
        match (&s.color_primaries, &s.color_transfer, &s.color_space) {
            (Some(p), Some(t), Some(m)) => Some(ColorInfo {
                primaries: p.clone(),
                transfer: t.clone(),
                matrix: m.clone(),
                mastering_display: None,
                max_content_light: None,
            }),
            _ => None,
        }
    });

    let audio_tracks = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .enumerate()
        .map(|(i, s)| AudioTrackInfo {
            index: i as u32,
            codec_name: s.codec_name.clone(),
            bitrate: s.bit_rate.as_deref().and_then(parse_bit_rate),
            channels: s.channels,
            sample_rate: s.sample_rate.as_deref().and_then(|r| r.trim().parse().ok()),
        })
        .collect();

    let subtitle_stream_count = streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .count() as u32;

    Ok(MediaInfo {
        path: path.to_path_buf(),
        duration,
        framerate,
        resolution,
        video_codec,
        video_bitrate,
        container,
        audio_tracks,
        subtitle_stream_count,
        color,
        external_audio_path: None,
    })
}

/// Run ffprobe on a source file and return its metadata.
pub fn probe_media(ffprobe: &Path, path: &Path) -> Result<MediaInfo, AppError> {
    log::debug!(
        target: "clipforge::probe",
        "Probing {} with {}",
        path.display(),
        ffprobe.display()
    );
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            AppError::FfmpegNotFound(format!("Failed to run {}: {}", ffprobe.display(), e))
        })?;
    if !output.status.success() {
        return Err(AppError::ffmpeg_failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    parse_ffprobe_json(path, &String::from_utf8_lossy(&output.stdout))
}

#[derive(Debug, Deserialize)]
struct FfprobePacket {
    pts_time: Option<String>,
    #[serde(default)]
    flags: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobePackets {
    packets: Option<Vec<FfprobePacket>>,
}

fn keyframe_times(json: &str) -> Vec<Duration> {
    let Ok(parsed) = serde_json::from_str::<FfprobePackets>(json) else {
        return Vec::new();
    };
    let mut times: Vec<Duration> = parsed
        .packets
        .unwrap_or_default()
        .iter()
        .filter(|p| p.flags.as_deref().is_some_and(|f| f.contains('K')))
        .filter_map(|p| p.pts_time.as_deref())
        .filter_map(|t| t.parse::<f64>().ok())
        .filter(|t| t.is_finite() && *t >= 0.0)
        .map(Duration::from_secs_f64)
        .collect();
    times.sort();
    times
}

/// Window scanned around the requested position when locating keyframes.
const KEYFRAME_SCAN_SECS: f64 = 10.0;

/// Nearest keyframe timestamps around `position`, for lossless-cut
/// suggestions. Either side may be None when no keyframe lies within the
/// scan window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeHints {
    #[serde(with = "secs_opt")]
    pub before: Option<Duration>,
    #[serde(with = "secs_opt")]
    pub after: Option<Duration>,
}

pub fn nearest_keyframes(
    ffprobe: &Path,
    path: &Path,
    position: Duration,
) -> Result<KeyframeHints, AppError> {
    let from = (position.as_secs_f64() - KEYFRAME_SCAN_SECS).max(0.0);
    let interval = format!("{}%+{}", from, KEYFRAME_SCAN_SECS * 2.0);
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-select_streams",
            "v:0",
            "-show_entries",
            "packet=pts_time,flags",
            "-print_format",
            "json",
            "-read_intervals",
            &interval,
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            AppError::FfmpegNotFound(format!("Failed to run {}: {}", ffprobe.display(), e))
        })?;
    if !output.status.success() {
        return Err(AppError::ffmpeg_failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    let times = keyframe_times(&String::from_utf8_lossy(&output.stdout));
    Ok(KeyframeHints {
        before: times.iter().rev().find(|t| **t <= position).copied(),
        after: times.iter().find(|t| **t >= position).copied(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "format": {
            "duration": "120.000000",
            "bit_rate": "5200000",
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2"
        },
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "30/1",
                "bit_rate": "5000000"
            },
            {
                "index": 1,
                "codec_type": "audio",
                "codec_name": "aac",
                "bit_rate": "128000",
                "channels": 2,
                "sample_rate": "48000"
            },
            {
                "index": 2,
                "codec_type": "audio",
                "codec_name": "ac3",
                "bit_rate": "384000",
                "channels": 6,
                "sample_rate": "48000"
            },
            {
                "index": 3,
                "codec_type": "subtitle",
                "codec_name": "mov_text"
            }
        ]
    }"#;

    #[test]
    fn parses_full_metadata() {
        let info = parse_ffprobe_json(Path::new("/in.mp4"), SAMPLE).expect("parse");
        assert_eq!(info.duration, Duration::from_secs(120));
        assert_eq!(info.framerate, 30.0);
        assert_eq!(info.resolution, Resolution::new(1920, 1080));
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.video_bitrate, Some(Bitrate::from_bps(5_000_000)));
        assert_eq!(info.audio_tracks.len(), 2);
        assert_eq!(info.audio_tracks[0].index, 0);
        assert_eq!(info.audio_tracks[1].channels, Some(6));
        assert_eq!(info.subtitle_stream_count, 1);
        assert!(info.has_video());
        assert!(info.has_audio());
    }

    #[test]
    fn tolerates_missing_fields() {
        let info = parse_ffprobe_json(Path::new("/in.bin"), r#"{"format": {}}"#).expect("parse");
        assert_eq!(info.duration, Duration::ZERO);
        assert_eq!(info.framerate, 0.0);
        assert!(!info.has_video());
        assert!(!info.has_audio());
    }

    #[test]
    fn video_bitrate_falls_back_to_format() {
        let json = r#"{
            "format": { "duration": "10", "bit_rate": "900000" },
            "streams": [
                { "index": 0, "codec_type": "video", "codec_name": "vp9",
                  "width": 640, "height": 480, "r_frame_rate": "24/1" }
            ]
        }"#;
        let info = parse_ffprobe_json(Path::new("/in.webm"), json).expect("parse");
        assert_eq!(info.video_bitrate, Some(Bitrate::from_bps(900_000)));
    }

    #[test]
    fn color_info_requires_all_three_tags() {
        let json = r#"{
            "format": { "duration": "10" },
            "streams": [
                { "index": 0, "codec_type": "video", "codec_name": "hevc",
                  "width": 3840, "height": 2160, "r_frame_rate": "24/1",
                  "color_primaries": "bt2020", "color_transfer": "smpte2084",
                  "color_space": "bt2020nc" }
            ]
        }"#;
        let info = parse_ffprobe_json(Path::new("/in.mkv"), json).expect("parse");
        let color = info.color.expect("color info");
        assert_eq!(color.primaries, "bt2020");
        assert_eq!(color.transfer, "smpte2084");
        assert_eq!(color.matrix, "bt2020nc");
    }

    #[test]
    fn keyframe_times_filters_and_sorts() {
        let json = r#"{"packets": [
            {"pts_time": "4.0", "flags": "K__"},
            {"pts_time": "2.0", "flags": "K__"},
            {"pts_time": "3.0", "flags": "___"},
            {"pts_time": "N/A", "flags": "K__"}
        ]}"#;
        let times = keyframe_times(json);
        assert_eq!(
            times,
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn invalid_frame_rate_strings() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("30000/1001").map(|f| (f * 100.0).round() / 100.0), Some(29.97));
        assert_eq!(parse_frame_rate("30"), None);
        assert_eq!(parse_frame_rate("30/0"), None);
    }
}
