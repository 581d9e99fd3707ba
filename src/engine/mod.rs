//! The conversion engine: turns a declarative request into one or more
//! encoder invocations, tracks their streaming progress, and exposes
//! stop/kill/pause/resume. One engine instance drives at most one external
//! process at a time; multi-segment and multi-pass runs are strictly
//! sequential so each step observes the previous one's progress baseline.

pub mod args;
pub mod process;
pub mod runner;
pub mod temp;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::encoders::EncodingMode;
use crate::error::AppError;
use crate::filters::{FadeDirection, Filter};
use crate::interval::TimeInterval;
use crate::job::ConversionOptions;
use crate::probe::MediaInfo;
use crate::progress::{ProgressData, ProgressTracker, parse_progress_line};
use self::args::{
    ConversionArgs, build_audio_extract_args, build_concat_args, build_conversion_args,
};
use self::process::{OsProcessController, ProcessController};
use self::runner::{ChildSlot, active_pid, kill_active, run_encoder_blocking};

/// Fade length applied at segment joins when the fade option is set.
const SEGMENT_FADE_SECS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Completed,
    Canceled,
    Aborted,
}

/// What the engine reports back to its owner. `Completed` and `Aborted` are
/// suppressed after an explicit stop; the owner already knows the outcome.
#[derive(Debug, Clone)]
pub enum ConversionEvent {
    Progress(ProgressData),
    Completed,
    Aborted(String),
}

/// Caller-supplied sink for engine events. The engine calls it from its
/// worker threads; the owner decides how to marshal onto its own thread.
pub type EventSink = Arc<dyn Fn(ConversionEvent) + Send + Sync>;

pub struct ConversionEngine {
    ffmpeg: PathBuf,
    events: EventSink,
    controller: Arc<dyn ProcessController>,
    slot: ChildSlot,
    stopped: Arc<AtomicBool>,
    state: Mutex<EngineState>,
}

/// Totals a run is measured against: wall time to encode, output frames,
/// and the expected output size for bitrate-controlled modes.
fn job_totals(source: &MediaInfo, options: &ConversionOptions) -> (Duration, u64, u64) {
    let total_time = match &options.cut_segments {
        Some(segments) if !segments.is_empty() => segments.total_duration(),
        _ => source.duration,
    };

    let output_fps = options
        .filters
        .iter()
        .find_map(|f| match f {
            Filter::Fps { rate } => Some(*rate),
            _ => None,
        })
        .unwrap_or(source.framerate);
    let total_frames = if output_fps > 0.0 {
        (total_time.as_secs_f64() * output_fps).round() as u64
    } else {
        0
    };

    let total_bytes = if options.mode.is_bitrate_mode() {
        let seconds = total_time.as_secs_f64();
        let mut bits = 0.0_f64;
        if let Some(video) = &options.video
            && let Some(bitrate) = video.bitrate.or(source.video_bitrate)
        {
            bits += bitrate.bps() as f64 * seconds;
        }
        if !options.no_audio {
            for (index, track) in options.enabled_audio_tracks() {
                let bitrate = track.encoder.bitrate.or_else(|| {
                    source
                        .audio_tracks
                        .get(index as usize)
                        .and_then(|t| t.bitrate)
                });
                if let Some(bitrate) = bitrate {
                    bits += bitrate.bps() as f64 * seconds;
                }
            }
        }
        (bits / 8.0) as u64
    } else {
        0
    };

    (total_time, total_frames, total_bytes)
}

impl ConversionEngine {
    pub fn new(ffmpeg: impl Into<PathBuf>, events: EventSink) -> Self {
        Self::with_controller(ffmpeg, events, Arc::new(OsProcessController))
    }

    pub fn with_controller(
        ffmpeg: impl Into<PathBuf>,
        events: EventSink,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            events,
            controller,
            slot: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(EngineState::Idle),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    /// Graceful stop: interrupt the encoder (the Ctrl+C equivalent) and let
    /// it flush a playable partial output. Returns once the signal is sent;
    /// the running conversion call returns when the process exits.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(pid) = active_pid(&self.slot) {
            log::info!(target: "clipforge::engine", "Interrupting encoder (pid {})", pid);
            // best effort: a failed signal must not crash the host
            if let Err(e) = self.controller.interrupt(pid) {
                log::warn!(target: "clipforge::engine", "Interrupt failed: {}", e);
            }
        }
        self.set_state(EngineState::Canceled);
    }

    /// Hard kill: terminate the encoder immediately. The output is likely
    /// unplayable.
    pub fn kill(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        kill_active(&self.slot);
        self.set_state(EngineState::Canceled);
    }

    /// Suspend the encoder process at the OS level. No output is produced
    /// and no progress fires while paused.
    pub fn pause(&self) {
        if self.state() != EngineState::Running {
            return;
        }
        if let Some(pid) = active_pid(&self.slot) {
            match self.controller.suspend(pid) {
                Ok(()) => self.set_state(EngineState::Paused),
                Err(e) => {
                    log::warn!(target: "clipforge::engine", "Suspend failed: {}", e)
                }
            }
        }
    }

    /// Resume a paused encoder exactly where it left off.
    pub fn resume(&self) {
        if self.state() != EngineState::Paused {
            return;
        }
        if let Some(pid) = active_pid(&self.slot) {
            match self.controller.resume(pid) {
                Ok(()) => self.set_state(EngineState::Running),
                Err(e) => {
                    log::warn!(target: "clipforge::engine", "Resume failed: {}", e)
                }
            }
        }
    }

    /// Convert `source` into `destination` per `options`, blocking until
    /// done. Progress and the terminal outcome are reported through the
    /// event sink; failures never escape as panics or returned errors
    /// beyond the terminal event. Returns the final engine state.
    pub fn convert(
        &self,
        source: &MediaInfo,
        destination: &Path,
        options: &ConversionOptions,
    ) -> EngineState {
        self.stopped.store(false, Ordering::Relaxed);
        self.set_state(EngineState::Running);

        let mut tracker = ProgressTracker::new();
        let (total_time, total_frames, total_bytes) = job_totals(source, options);
        tracker.set_totals(total_time, total_frames, total_bytes);
        tracker.set_mode(options.mode);

        log::info!(
            target: "clipforge::engine",
            "Starting conversion: {} -> {} ({:?}, {:.1}s, {} frames)",
            source.path.display(),
            destination.display(),
            options.mode,
            total_time.as_secs_f64(),
            total_frames
        );

        let result = self.run_conversion(source, destination, options, &mut tracker);
        self.finish(result)
    }

    /// Stream-copy one audio track out of the source (or its detached audio
    /// file), optionally clipped to `range`. Same lifecycle and events as a
    /// full conversion.
    pub fn extract_audio(
        &self,
        source: &MediaInfo,
        destination: &Path,
        track: u32,
        range: Option<TimeInterval>,
    ) -> EngineState {
        self.stopped.store(false, Ordering::Relaxed);
        self.set_state(EngineState::Running);

        let mut tracker = ProgressTracker::new();
        let total_time = range.map_or(source.duration, TimeInterval::duration);
        tracker.set_totals(total_time, 0, 0);
        tracker.set_mode(EncodingMode::Copy);

        let argv = build_audio_extract_args(source, track, range, destination);
        let result = self.run_process(argv, &mut tracker);
        self.finish(result)
    }

    fn finish(&self, result: Result<(), AppError>) -> EngineState {
        if self.stopped.load(Ordering::Relaxed) {
            // the caller initiated this; no terminal event fires
            self.set_state(EngineState::Canceled);
            return EngineState::Canceled;
        }
        match result {
            Ok(()) => {
                self.set_state(EngineState::Completed);
                (self.events)(ConversionEvent::Completed);
                EngineState::Completed
            }
            Err(AppError::Aborted) => {
                self.set_state(EngineState::Canceled);
                EngineState::Canceled
            }
            Err(error) => {
                let text = match error {
                    AppError::FfmpegFailed { stderr, .. } => stderr,
                    other => other.to_string(),
                };
                self.set_state(EngineState::Aborted);
                (self.events)(ConversionEvent::Aborted(text));
                EngineState::Aborted
            }
        }
    }

    fn run_conversion(
        &self,
        source: &MediaInfo,
        destination: &Path,
        options: &ConversionOptions,
        tracker: &mut ProgressTracker,
    ) -> Result<(), AppError> {
        let segments: Vec<TimeInterval> = options
            .cut_segments
            .as_ref()
            .map(|c| c.intervals().to_vec())
            .unwrap_or_default();

        match segments.len() {
            0 => self.run_range(source, destination, options, None, tracker),
            1 => self.run_range(source, destination, options, Some(segments[0]), tracker),
            _ => self.run_segmented(source, destination, options, &segments, tracker),
        }
    }

    /// Whole-file or single-segment strategy, including the two-pass flip.
    fn run_range(
        &self,
        source: &MediaInfo,
        destination: &Path,
        options: &ConversionOptions,
        range: Option<TimeInterval>,
        tracker: &mut ProgressTracker,
    ) -> Result<(), AppError> {
        if options.mode == EncodingMode::FirstPass {
            let log = temp::pass_log_prefix(destination, 0);
            self.run_encode(
                source,
                options,
                EncodingMode::FirstPass,
                range,
                Some(&log),
                &[],
                destination,
                tracker,
            )?;
            tracker.begin_second_pass();
            let result = self.run_encode(
                source,
                options,
                EncodingMode::SecondPass,
                range,
                Some(&log),
                &[],
                destination,
                tracker,
            );
            temp::cleanup_pass_logs(destination);
            result
        } else {
            self.run_encode(
                source,
                options,
                options.mode,
                range,
                None,
                &[],
                destination,
                tracker,
            )
        }
    }

    /// Multi-segment strategy: sequential per-segment runs into `_part_N`
    /// files, then a concat stream-copy, then cleanup. Any failure
    /// short-circuits and skips concatenation; produced parts are left for
    /// inspection while logs and the list are still swept.
    fn run_segmented(
        &self,
        source: &MediaInfo,
        destination: &Path,
        options: &ConversionOptions,
        segments: &[TimeInterval],
        tracker: &mut ProgressTracker,
    ) -> Result<(), AppError> {
        let two_pass = options.mode == EncodingMode::FirstPass;

        if two_pass {
            for (index, segment) in segments.iter().enumerate() {
                let log = temp::pass_log_prefix(destination, index);
                self.run_encode(
                    source,
                    options,
                    EncodingMode::FirstPass,
                    Some(*segment),
                    Some(&log),
                    &[],
                    destination,
                    tracker,
                )?;
                tracker.commit_segment();
            }
            tracker.begin_second_pass();
        }

        let encode_mode = if two_pass {
            EncodingMode::SecondPass
        } else {
            options.mode
        };

        let mut parts: Vec<PathBuf> = Vec::with_capacity(segments.len());
        let result = (|| -> Result<(), AppError> {
            for (index, segment) in segments.iter().enumerate() {
                let part = temp::part_path(destination, index);
                let mut joins: Vec<Filter> = Vec::new();
                if options.fade_segments {
                    if index > 0 {
                        joins.push(Filter::Fade {
                            direction: FadeDirection::In,
                            duration: SEGMENT_FADE_SECS,
                            start: 0.0,
                        });
                    }
                    if index + 1 < segments.len() {
                        let start =
                            (segment.duration().as_secs_f64() - SEGMENT_FADE_SECS).max(0.0);
                        joins.push(Filter::Fade {
                            direction: FadeDirection::Out,
                            duration: SEGMENT_FADE_SECS,
                            start,
                        });
                    }
                }
                let log = two_pass.then(|| temp::pass_log_prefix(destination, index));
                self.run_encode(
                    source,
                    options,
                    encode_mode,
                    Some(*segment),
                    log.as_deref(),
                    &joins,
                    &part,
                    tracker,
                )?;
                parts.push(part);
                tracker.commit_segment();
            }

            let list = temp::concat_list_path(destination);
            temp::write_concat_list(&list, &parts)?;
            let argv = build_concat_args(&list, destination);
            self.run_process(argv, tracker)
        })();

        if result.is_ok() {
            temp::cleanup_parts(&parts);
        }
        temp::cleanup_concat_list(destination);
        temp::cleanup_pass_logs(destination);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_encode(
        &self,
        source: &MediaInfo,
        options: &ConversionOptions,
        mode: EncodingMode,
        range: Option<TimeInterval>,
        pass_log: Option<&Path>,
        extra_filters: &[Filter],
        output: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<(), AppError> {
        tracker.set_mode(mode);
        let ctx = ConversionArgs {
            source,
            options,
            mode,
            range,
            pass_log,
            extra_filters,
            output,
        };
        let argv = build_conversion_args(&ctx);
        self.run_process(argv, tracker)
    }

    fn run_process(
        &self,
        argv: Vec<String>,
        tracker: &mut ProgressTracker,
    ) -> Result<(), AppError> {
        let events = Arc::clone(&self.events);
        run_encoder_blocking(&self.ffmpeg, argv, &self.slot, &self.stopped, |line| {
            if let Some(parsed) = parse_progress_line(line)
                && tracker.absorb(parsed)
            {
                events(ConversionEvent::Progress(tracker.data.clone()));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::encoders::{AudioCodec, AudioEncoder, VideoCodec, VideoEncoder};
    use crate::interval::TimeIntervalCollection;
    use crate::job::AudioTrackOptions;
    use crate::probe::AudioTrackInfo;
    use crate::units::{Bitrate, Resolution};

    fn source_120s_30fps() -> MediaInfo {
        MediaInfo {
            path: PathBuf::from("/in.mp4"),
            duration: Duration::from_secs(120),
            framerate: 30.0,
            resolution: Resolution::new(1920, 1080),
            video_codec: Some("h264".into()),
            video_bitrate: Some(Bitrate::from_kbps(5000.0)),
            container: Some("mp4".into()),
            audio_tracks: vec![AudioTrackInfo {
                index: 0,
                codec_name: Some("aac".into()),
                bitrate: Some(Bitrate::from_kbps(128.0)),
                channels: Some(2),
                sample_rate: Some(48_000),
            }],
            subtitle_stream_count: 0,
            color: None,
            external_audio_path: None,
        }
    }

    #[test]
    fn totals_for_whole_file_constant_quality() {
        let source = source_120s_30fps();
        let options = ConversionOptions::new(
            Some(VideoEncoder::new(VideoCodec::X264)),
            EncodingMode::ConstantQuality,
        );
        let (time, frames, bytes) = job_totals(&source, &options);
        assert_eq!(time, Duration::from_secs(120));
        assert_eq!(frames, 3600);
        assert_eq!(bytes, 0, "byte totals only exist for bitrate modes");
    }

    #[test]
    fn totals_use_cut_segments_and_bitrates() {
        let source = source_120s_30fps();
        let mut video = VideoEncoder::new(VideoCodec::X264);
        video.bitrate = Some(Bitrate::from_kbps(4000.0));
        let mut options = ConversionOptions::new(Some(video), EncodingMode::FirstPass);
        options.no_audio = true;

        let mut segments = TimeIntervalCollection::for_media(Duration::from_secs(120));
        segments.add(
            TimeInterval::new(Duration::from_secs(10), Duration::from_secs(40)).expect("interval"),
        );
        segments.add(
            TimeInterval::new(Duration::from_secs(60), Duration::from_secs(90)).expect("interval"),
        );
        options.cut_segments = Some(segments);

        let (time, frames, bytes) = job_totals(&source, &options);
        assert_eq!(time, Duration::from_secs(60));
        assert_eq!(frames, 1800);
        assert_eq!(bytes, 30_000_000);
    }

    #[test]
    fn totals_add_enabled_audio_tracks_with_source_fallback() {
        let source = source_120s_30fps();
        let mut video = VideoEncoder::new(VideoCodec::X264);
        video.bitrate = Some(Bitrate::from_kbps(4000.0));
        let mut options =
            ConversionOptions::new(Some(video), EncodingMode::SinglePassBitrate);
        let mut tracks = BTreeMap::new();
        // no override bitrate: the source track's own 128k applies
        tracks.insert(
            0,
            AudioTrackOptions {
                enabled: true,
                encoder: AudioEncoder::new(AudioCodec::Copy),
            },
        );
        options.audio_tracks = tracks;

        let (_, _, bytes) = job_totals(&source, &options);
        // (4000k + 128k) * 120s / 8
        assert_eq!(bytes, (4_128_000.0_f64 * 120.0 / 8.0) as u64);
    }

    #[test]
    fn totals_prefer_explicit_fps_filter() {
        let source = source_120s_30fps();
        let mut options = ConversionOptions::new(
            Some(VideoEncoder::new(VideoCodec::X264)),
            EncodingMode::ConstantQuality,
        );
        options.filters.push(Filter::Fps { rate: 60.0 });
        let (_, frames, _) = job_totals(&source, &options);
        assert_eq!(frames, 7200);
    }
}
