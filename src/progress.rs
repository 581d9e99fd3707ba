//! The `key=value` progress protocol spoken by the encoder subprocess
//! (`-progress pipe:1`) and the accumulating snapshot dispatched to
//! listeners. Across multi-segment and multi-pass runs the snapshot's
//! counters are baseline + live: monotone over the whole job, reset only at
//! the pass boundary.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::encoders::EncodingMode;
use crate::units::secs;

static OUT_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):(\d{2}):(\d{2})(?:\.(\d+))?$").expect("invalid out_time regex")
});

/// One recognized line of the progress stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    Frame(u64),
    Fps(f64),
    /// kbits/s, suffix already stripped.
    Bitrate(f64),
    TotalSize(u64),
    OutTime(Duration),
    Speed(f64),
    /// The `progress` sentinel: flush the current snapshot to listeners.
    Flush,
}

fn parse_out_time(value: &str) -> Option<Duration> {
    let caps = OUT_TIME_RE.captures(value)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    let mut total = Duration::from_secs(hours * 3600 + minutes * 60 + seconds);
    if let Some(frac) = caps.get(4) {
        let digits = frac.as_str();
        let micros: u64 = digits.parse().ok()?;
        // scale to microseconds regardless of how many digits were printed
        let scale = 10u64.pow(6u32.saturating_sub(digits.len() as u32));
        let micros = if digits.len() > 6 {
            micros / 10u64.pow(digits.len() as u32 - 6)
        } else {
            micros * scale
        };
        total += Duration::from_micros(micros);
    }
    Some(total)
}

/// Parse one line of the protocol. Unknown keys and `N/A` values yield
/// None, leaving the snapshot untouched.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();
    if value == "N/A" {
        return None;
    }
    match key.trim() {
        "frame" => value.parse().ok().map(ProgressLine::Frame),
        "fps" => value.parse().ok().map(ProgressLine::Fps),
        "bitrate" => value
            .trim_end_matches("kbits/s")
            .trim()
            .parse()
            .ok()
            .map(ProgressLine::Bitrate),
        "total_size" => value.parse().ok().map(ProgressLine::TotalSize),
        "out_time" => parse_out_time(value).map(ProgressLine::OutTime),
        "speed" => value
            .trim_end_matches('x')
            .trim()
            .parse()
            .ok()
            .map(ProgressLine::Speed),
        "progress" => Some(ProgressLine::Flush),
        _ => None,
    }
}

/// Snapshot of encoding progress handed to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    pub mode: EncodingMode,
    #[serde(with = "secs")]
    pub current_time: Duration,
    #[serde(with = "secs")]
    pub total_time: Duration,
    pub current_frames: u64,
    pub total_frames: u64,
    pub current_byte_size: u64,
    pub total_byte_size: u64,
    /// Rolling average of the reported bitrate, kbits/s.
    pub average_bitrate_kbps: f64,
    /// Encode speed as a multiple of real time.
    pub speed: f64,
    pub fps: f64,
    /// Overall job percentage in [0, 100]; two-pass runs confine the first
    /// pass to [0, 50] and the second to [50, 100].
    pub percentage: f64,
}

impl Default for ProgressData {
    fn default() -> Self {
        Self {
            mode: EncodingMode::ConstantQuality,
            current_time: Duration::ZERO,
            total_time: Duration::ZERO,
            current_frames: 0,
            total_frames: 0,
            current_byte_size: 0,
            total_byte_size: 0,
            average_bitrate_kbps: 0.0,
            speed: 0.0,
            fps: 0.0,
            percentage: 0.0,
        }
    }
}

/// Bitrate samples are ignored until the encoder has settled. Heuristic,
/// tunable.
pub const AVG_BITRATE_MIN_PERCENT: f64 = 5.0;

/// Owns the live snapshot plus the baseline carried over from previously
/// completed segments. Threaded explicitly through the engine's run loop.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    pub data: ProgressData,
    baseline_time: Duration,
    baseline_frames: u64,
    baseline_bytes: u64,
    bitrate_samples: u32,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_totals(&mut self, total_time: Duration, total_frames: u64, total_bytes: u64) {
        self.data.total_time = total_time;
        self.data.total_frames = total_frames;
        self.data.total_byte_size = total_bytes;
    }

    pub fn set_mode(&mut self, mode: EncodingMode) {
        self.data.mode = mode;
    }

    /// Raw progress of the current pass in [0, 100]: frame-based when the
    /// frame total is known, else the time ratio.
    fn raw_percentage(&self) -> f64 {
        let raw = if self.data.total_frames > 0 {
            self.data.current_frames as f64 * 100.0 / self.data.total_frames as f64
        } else if !self.data.total_time.is_zero() {
            self.data.current_time.as_secs_f64() * 100.0 / self.data.total_time.as_secs_f64()
        } else {
            0.0
        };
        raw.clamp(0.0, 100.0)
    }

    fn update_percentage(&mut self) {
        let raw = self.raw_percentage();
        self.data.percentage = match self.data.mode {
            EncodingMode::FirstPass => raw / 2.0,
            EncodingMode::SecondPass => 50.0 + raw / 2.0,
            _ => raw,
        };
    }

    /// Fold one protocol line into the snapshot. Returns true on the flush
    /// sentinel, meaning the snapshot should be dispatched now.
    pub fn absorb(&mut self, line: ProgressLine) -> bool {
        match line {
            ProgressLine::Frame(n) => {
                self.data.current_frames = self.baseline_frames + n;
            }
            ProgressLine::OutTime(t) => {
                self.data.current_time = self.baseline_time + t;
            }
            ProgressLine::TotalSize(bytes) => {
                self.data.current_byte_size = self.baseline_bytes + bytes;
            }
            ProgressLine::Fps(fps) => self.data.fps = fps,
            ProgressLine::Speed(speed) => self.data.speed = speed,
            ProgressLine::Bitrate(kbps) => {
                self.update_percentage();
                if self.data.percentage > AVG_BITRATE_MIN_PERCENT {
                    self.bitrate_samples += 1;
                    let n = self.bitrate_samples as f64;
                    self.data.average_bitrate_kbps += (kbps - self.data.average_bitrate_kbps) / n;
                }
            }
            ProgressLine::Flush => {
                self.update_percentage();
                return true;
            }
        }
        false
    }

    /// Segment boundary: the just-finished segment's counters become the
    /// baseline for the next one.
    pub fn commit_segment(&mut self) {
        self.baseline_time = self.data.current_time;
        self.baseline_frames = self.data.current_frames;
        self.baseline_bytes = self.data.current_byte_size;
    }

    /// Pass boundary: time and frame accumulators restart at zero; the
    /// percentage window shifts to [50, 100].
    pub fn begin_second_pass(&mut self) {
        self.baseline_time = Duration::ZERO;
        self.baseline_frames = 0;
        self.baseline_bytes = self.data.current_byte_size;
        self.data.current_time = Duration::ZERO;
        self.data.current_frames = 0;
        self.data.mode = EncodingMode::SecondPass;
        self.update_percentage();
    }
}
