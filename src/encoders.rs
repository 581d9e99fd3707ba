//! Video and audio encoder descriptors. Each encoder turns its current
//! parameter state into the codec-specific argument fragment for a given
//! encoding mode; the fragment is a pure function of the fields and modes a
//! codec cannot serve yield an empty fragment.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::units::Bitrate;

/// How the video stream is rate-controlled for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EncodingMode {
    ConstantQuality,
    SinglePassBitrate,
    FirstPass,
    SecondPass,
    Copy,
    NoEncoding,
}

impl EncodingMode {
    pub fn is_bitrate_mode(self) -> bool {
        matches!(
            self,
            Self::SinglePassBitrate | Self::FirstPass | Self::SecondPass
        )
    }

    pub fn is_two_pass(self) -> bool {
        matches!(self, Self::FirstPass | Self::SecondPass)
    }
}

/// Ordinal quality level. Codecs map it to their own rate-control number
/// with a per-codec `base + level * step` affine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Quality {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl Quality {
    pub fn level(self) -> i32 {
        match self {
            Self::Highest => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::Lowest => 4,
        }
    }
}

/// x264-style speed presets; other codec families map them onto their own
/// speed scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

/// libsvtav1 preset: 0-13 (higher = faster). Maps x264-style preset names.
static SVTAV1_PRESET_MAP: LazyLock<HashMap<Preset, &'static str>> = LazyLock::new(|| {
    [
        (Preset::Ultrafast, "12"),
        (Preset::Superfast, "11"),
        (Preset::Veryfast, "10"),
        (Preset::Faster, "9"),
        (Preset::Fast, "8"),
        (Preset::Medium, "6"),
        (Preset::Slow, "4"),
        (Preset::Slower, "3"),
        (Preset::Veryslow, "2"),
    ]
    .into_iter()
    .collect()
});

/// libvpx-vp9 (deadline, cpu-used) per preset name.
static VP9_SPEED_MAP: LazyLock<HashMap<Preset, (&'static str, &'static str)>> =
    LazyLock::new(|| {
        [
            (Preset::Ultrafast, ("good", "5")),
            (Preset::Superfast, ("good", "4")),
            (Preset::Veryfast, ("good", "3")),
            (Preset::Faster, ("good", "3")),
            (Preset::Fast, ("good", "2")),
            (Preset::Medium, ("good", "1")),
            (Preset::Slow, ("best", "0")),
            (Preset::Slower, ("best", "0")),
            (Preset::Veryslow, ("best", "0")),
        ]
        .into_iter()
        .collect()
    });

/// NVENC p1 (fastest) .. p7 (slowest) per preset name.
static NVENC_PRESET_MAP: LazyLock<HashMap<Preset, &'static str>> = LazyLock::new(|| {
    [
        (Preset::Ultrafast, "p1"),
        (Preset::Superfast, "p2"),
        (Preset::Veryfast, "p3"),
        (Preset::Faster, "p3"),
        (Preset::Fast, "p4"),
        (Preset::Medium, "p5"),
        (Preset::Slow, "p6"),
        (Preset::Slower, "p7"),
        (Preset::Veryslow, "p7"),
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuv420p10le,
    P010le,
}

impl PixelFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Yuv420p10le => "yuv420p10le",
            Self::P010le => "p010le",
        }
    }
}

/// HDR color metadata carried from the source. Attached to an encoder only
/// when the output should preserve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorInfo {
    pub primaries: String,
    pub transfer: String,
    pub matrix: String,
    pub mastering_display: Option<String>,
    pub max_content_light: Option<String>,
}

/// The closed set of supported video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoCodec {
    X264,
    X265,
    SvtAv1,
    Vp9,
    H264Nvenc,
    HevcNvenc,
}

impl VideoCodec {
    pub fn encoder_name(self) -> &'static str {
        match self {
            Self::X264 => "libx264",
            Self::X265 => "libx265",
            Self::SvtAv1 => "libsvtav1",
            Self::Vp9 => "libvpx-vp9",
            Self::H264Nvenc => "h264_nvenc",
            Self::HevcNvenc => "hevc_nvenc",
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, Self::H264Nvenc | Self::HevcNvenc)
    }

    pub fn supports_two_pass(self) -> bool {
        !self.is_hardware()
    }

    pub fn hdr_capable(self) -> bool {
        matches!(self, Self::X265 | Self::HevcNvenc)
    }

    pub fn pixel_formats(self) -> &'static [PixelFormat] {
        match self {
            Self::X264 => &[
                PixelFormat::Yuv420p,
                PixelFormat::Yuv422p,
                PixelFormat::Yuv444p,
            ],
            Self::X265 => &[
                PixelFormat::Yuv420p,
                PixelFormat::Yuv422p,
                PixelFormat::Yuv444p,
                PixelFormat::Yuv420p10le,
            ],
            Self::SvtAv1 => &[PixelFormat::Yuv420p, PixelFormat::Yuv420p10le],
            Self::Vp9 => &[
                PixelFormat::Yuv420p,
                PixelFormat::Yuv422p,
                PixelFormat::Yuv444p,
            ],
            Self::H264Nvenc => &[PixelFormat::Yuv420p, PixelFormat::Yuv444p],
            Self::HevcNvenc => &[PixelFormat::Yuv420p, PixelFormat::P010le],
        }
    }

    /// Static compatibility table: formats hardware encoders cannot take
    /// directly are downgraded to the nearest one they can.
    pub fn compatible_pixel_format(self, requested: PixelFormat) -> PixelFormat {
        if self.is_hardware() && requested == PixelFormat::Yuv420p10le {
            return PixelFormat::P010le;
        }
        if self.pixel_formats().contains(&requested) {
            requested
        } else {
            PixelFormat::Yuv420p
        }
    }

    /// Per-family affine from the ordinal quality level to the codec's
    /// rate-control number.
    fn quality_value(self, quality: Quality) -> i32 {
        let level = quality.level();
        match self {
            Self::X264 => 16 + level * 6,
            Self::X265 => 18 + level * 6,
            Self::SvtAv1 => 22 + level * 8,
            Self::Vp9 => 22 + level * 8,
            Self::H264Nvenc | Self::HevcNvenc => 19 + level * 7,
        }
    }
}

/// A configured video encoder. `args` must only be called once quality,
/// preset, bitrate and pixel format have been set for the intended mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEncoder {
    pub codec: VideoCodec,
    pub quality: Quality,
    pub preset: Preset,
    pub bitrate: Option<Bitrate>,
    pub pixel_format: Option<PixelFormat>,
    pub color: Option<ColorInfo>,
}

impl VideoEncoder {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            quality: Quality::Medium,
            preset: Preset::Fast,
            bitrate: None,
            pixel_format: None,
            color: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.codec.encoder_name()
    }

    pub fn supports_two_pass(&self) -> bool {
        self.codec.supports_two_pass()
    }

    /// The codec's rate-control number for the configured quality.
    pub fn quality_value(&self) -> i32 {
        self.codec.quality_value(self.quality)
    }

    fn preset_args(&self) -> Vec<String> {
        match self.codec {
            VideoCodec::X264 | VideoCodec::X265 => {
                vec!["-preset".into(), self.preset.as_str().into()]
            }
            VideoCodec::SvtAv1 => vec![
                "-preset".into(),
                SVTAV1_PRESET_MAP.get(&self.preset).unwrap_or(&"8").to_string(),
            ],
            VideoCodec::Vp9 => {
                let (deadline, cpu_used) =
                    VP9_SPEED_MAP.get(&self.preset).copied().unwrap_or(("good", "2"));
                vec![
                    "-deadline".into(),
                    deadline.into(),
                    "-cpu-used".into(),
                    cpu_used.into(),
                    "-row-mt".into(),
                    "1".into(),
                ]
            }
            VideoCodec::H264Nvenc | VideoCodec::HevcNvenc => vec![
                "-preset".into(),
                NVENC_PRESET_MAP.get(&self.preset).unwrap_or(&"p4").to_string(),
            ],
        }
    }

    fn rate_control_args(&self, mode: EncodingMode) -> Option<Vec<String>> {
        let quality = self.quality_value().to_string();
        match mode {
            EncodingMode::ConstantQuality => Some(match self.codec {
                VideoCodec::X264 | VideoCodec::X265 | VideoCodec::SvtAv1 => {
                    vec!["-crf".into(), quality]
                }
                VideoCodec::Vp9 => vec!["-crf".into(), quality, "-b:v".into(), "0".into()],
                VideoCodec::H264Nvenc | VideoCodec::HevcNvenc => vec![
                    "-rc".into(),
                    "vbr".into(),
                    "-cq".into(),
                    quality,
                    "-b:v".into(),
                    "0".into(),
                ],
            }),
            EncodingMode::SinglePassBitrate => {
                let bitrate = self.bitrate?;
                Some(match self.codec {
                    VideoCodec::H264Nvenc | VideoCodec::HevcNvenc => vec![
                        "-rc".into(),
                        "cbr".into(),
                        "-b:v".into(),
                        bitrate.as_ffmpeg_arg(),
                    ],
                    _ => vec!["-b:v".into(), bitrate.as_ffmpeg_arg()],
                })
            }
            EncodingMode::FirstPass | EncodingMode::SecondPass => {
                if !self.supports_two_pass() {
                    return None;
                }
                let bitrate = self.bitrate?;
                let pass = if mode == EncodingMode::FirstPass { "1" } else { "2" };
                Some(match self.codec {
                    VideoCodec::X265 => vec![
                        "-b:v".into(),
                        bitrate.as_ffmpeg_arg(),
                        "-x265-params".into(),
                        format!("pass={}", pass),
                    ],
                    _ => vec![
                        "-b:v".into(),
                        bitrate.as_ffmpeg_arg(),
                        "-pass".into(),
                        pass.into(),
                    ],
                })
            }
            EncodingMode::Copy | EncodingMode::NoEncoding => None,
        }
    }

    fn color_args(&self) -> Vec<String> {
        let Some(color) = &self.color else {
            return Vec::new();
        };
        if !self.codec.hdr_capable() {
            return Vec::new();
        }
        let mut args = vec![
            "-color_primaries".to_string(),
            color.primaries.clone(),
            "-color_trc".to_string(),
            color.transfer.clone(),
            "-colorspace".to_string(),
            color.matrix.clone(),
        ];
        if self.codec == VideoCodec::X265 {
            let mut params = Vec::new();
            if let Some(md) = &color.mastering_display {
                params.push(format!("master-display={}", md));
            }
            if let Some(cll) = &color.max_content_light {
                params.push(format!("max-cll={}", cll));
            }
            if !params.is_empty() {
                args.push("-x265-params".to_string());
                args.push(format!("hdr-opt=1:{}", params.join(":")));
            }
        }
        args
    }

    /// The codec argument fragment for `mode`. Empty for mode/codec
    /// combinations the encoder cannot serve.
    pub fn args(&self, mode: EncodingMode) -> Vec<String> {
        match mode {
            EncodingMode::Copy => return vec!["-c:v".into(), "copy".into()],
            EncodingMode::NoEncoding => return Vec::new(),
            _ => {}
        }
        let Some(rate_control) = self.rate_control_args(mode) else {
            return Vec::new();
        };
        let mut args = vec!["-c:v".to_string(), self.name().to_string()];
        args.extend(self.preset_args());
        args.extend(rate_control);
        if let Some(requested) = self.pixel_format {
            let format = self.codec.compatible_pixel_format(requested);
            args.push("-pix_fmt".into());
            args.push(format.as_str().into());
        }
        args.extend(self.color_args());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioCodec {
    Aac,
    Opus,
    Flac,
    Copy,
}

impl AudioCodec {
    pub fn encoder_name(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Flac => "flac",
            Self::Copy => "copy",
        }
    }
}

const DEFAULT_AUDIO_BITRATE_KBPS: f64 = 128.0;

/// A configured audio encoder for one output track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEncoder {
    pub codec: AudioCodec,
    pub bitrate: Option<Bitrate>,
}

impl AudioEncoder {
    pub fn new(codec: AudioCodec) -> Self {
        Self {
            codec,
            bitrate: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.codec.encoder_name()
    }

    /// Argument fragment for the output track at `ordinal` (the position in
    /// the output's audio stream order, not the source index).
    pub fn args(&self, ordinal: usize) -> Vec<String> {
        let codec_flag = format!("-c:a:{}", ordinal);
        match self.codec {
            AudioCodec::Copy => vec![codec_flag, "copy".into()],
            AudioCodec::Flac => vec![codec_flag, "flac".into()],
            AudioCodec::Aac | AudioCodec::Opus => {
                let bitrate = self
                    .bitrate
                    .unwrap_or_else(|| Bitrate::from_kbps(DEFAULT_AUDIO_BITRATE_KBPS));
                vec![
                    codec_flag,
                    self.name().into(),
                    format!("-b:a:{}", ordinal),
                    bitrate.as_ffmpeg_arg(),
                ]
            }
        }
    }
}

/// Queries `ffmpeg -encoders` once and returns the codecs of our closed set
/// the binary actually provides. Resolved at startup and injected; never a
/// process-global.
pub fn detect_available_encoders(ffmpeg: &Path) -> Result<Vec<VideoCodec>, AppError> {
    let mut child = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| AppError::FfmpegNotFound(format!("Failed to run {}: {}", ffmpeg.display(), e)))?;

    let mut listing = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        let _ = stdout.read_to_string(&mut listing);
    }
    let _ = child.wait();

    Ok(parse_encoder_listing(&listing))
}

fn parse_encoder_listing(listing: &str) -> Vec<VideoCodec> {
    const ALL: [VideoCodec; 6] = [
        VideoCodec::X264,
        VideoCodec::X265,
        VideoCodec::SvtAv1,
        VideoCodec::Vp9,
        VideoCodec::H264Nvenc,
        VideoCodec::HevcNvenc,
    ];
    ALL.into_iter()
        .filter(|codec| {
            listing
                .lines()
                .any(|line| line.split_whitespace().nth(1) == Some(codec.encoder_name()))
        })
        .collect()
}
