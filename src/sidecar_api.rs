//! Operations the sidecar binary exposes to a UI process: tool discovery,
//! media inspection, command preview and capability reporting. Conversion
//! itself goes through [`crate::engine::ConversionEngine`], owned by the
//! binary so cancel/pause/resume can reach the running job.

use std::env;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::encoders::{VideoCodec, detect_available_encoders};
use crate::engine::args::{ConversionArgs, build_conversion_args};
use crate::error::AppError;
use crate::job::ConversionOptions;
use crate::probe::{KeyframeHints, MediaInfo, nearest_keyframes, probe_media};

pub const PROTOCOL_VERSION: u8 = 1;

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = dir.join(format!("{}.exe", binary));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

fn discover_tool(env_override: &str, binary: &str) -> Result<PathBuf, AppError> {
    if let Some(path) = env::var_os(env_override) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(AppError::FfmpegNotFound(format!(
            "{} points at {}, which does not exist",
            env_override,
            path.display()
        )));
    }
    find_in_path(binary).ok_or_else(|| {
        AppError::FfmpegNotFound(format!("{} not found in PATH; set {}", binary, env_override))
    })
}

/// Resolve the encoder binary: `CLIPFORGE_FFMPEG` override, then PATH.
pub fn discover_ffmpeg() -> Result<PathBuf, AppError> {
    discover_tool("CLIPFORGE_FFMPEG", "ffmpeg")
}

/// Resolve the prober binary: `CLIPFORGE_FFPROBE` override, then PATH.
pub fn discover_ffprobe() -> Result<PathBuf, AppError> {
    discover_tool("CLIPFORGE_FFPROBE", "ffprobe")
}

pub fn inspect_media(path: &Path) -> Result<MediaInfo, AppError> {
    let ffprobe = discover_ffprobe()?;
    probe_media(&ffprobe, path)
}

pub fn keyframe_hints(
    path: &Path,
    position: std::time::Duration,
) -> Result<KeyframeHints, AppError> {
    let ffprobe = discover_ffprobe()?;
    nearest_keyframes(&ffprobe, path, position)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResult {
    pub protocol_version: u8,
    pub encoders: Vec<VideoCodec>,
}

/// Protocol version plus the video encoders the resolved FFmpeg build
/// actually provides. Queried once at startup by the UI.
pub fn capabilities() -> Result<CapabilitiesResult, AppError> {
    let ffmpeg = discover_ffmpeg()?;
    let encoders = detect_available_encoders(&ffmpeg)?;
    Ok(CapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        encoders,
    })
}

/// Formats args for readable display: option and value on the same line
/// when the next arg is a value.
pub fn format_args_for_display_multiline(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let line = if arg.starts_with('-') && i + 1 < args.len() && !args[i + 1].starts_with('-') {
            let value = &args[i + 1];
            i += 2;
            format!("  {} {}", arg, value)
        } else {
            i += 1;
            format!("  {}", arg)
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Human-readable rendering of the command a conversion would run, for the
/// UI's command preview panel.
pub fn preview_command(
    source: &MediaInfo,
    options: &ConversionOptions,
    destination: &Path,
) -> String {
    let range = options
        .cut_segments
        .as_ref()
        .and_then(|c| c.intervals().first().copied());
    let ctx = ConversionArgs {
        source,
        options,
        mode: options.mode,
        range,
        pass_log: None,
        extra_filters: &[],
        output: destination,
    };
    let args = build_conversion_args(&ctx);
    format!("ffmpeg\n{}", format_args_for_display_multiline(&args))
}
