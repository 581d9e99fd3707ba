//! The declarative conversion request and the job wrapping it. Options are
//! captured by value when a job starts and never mutated during a run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::encoders::{AudioEncoder, EncodingMode, VideoEncoder};
use crate::filters::Filter;
use crate::interval::TimeIntervalCollection;
use crate::probe::MediaInfo;

/// Per-source-track audio settings. The map key is the source audio stream
/// index; map order is output order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackOptions {
    pub enabled: bool,
    pub encoder: AudioEncoder,
}

/// The immutable per-run request aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOptions {
    /// None means the output carries no video stream.
    pub video: Option<VideoEncoder>,
    pub mode: EncodingMode,
    #[serde(default)]
    pub audio_tracks: BTreeMap<u32, AudioTrackOptions>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Ranges to keep. None (or an empty collection) means the whole file.
    #[serde(default)]
    pub cut_segments: Option<TimeIntervalCollection>,
    /// Fade segment joins when cutting more than one range.
    #[serde(default)]
    pub fade_segments: bool,
    #[serde(default)]
    pub no_audio: bool,
}

impl ConversionOptions {
    pub fn new(video: Option<VideoEncoder>, mode: EncodingMode) -> Self {
        Self {
            video,
            mode,
            audio_tracks: BTreeMap::new(),
            filters: Vec::new(),
            cut_segments: None,
            fade_segments: false,
            no_audio: false,
        }
    }

    /// Enabled tracks as `(source index, options)` in output order.
    pub fn enabled_audio_tracks(&self) -> impl Iterator<Item = (u32, &AudioTrackOptions)> {
        self.audio_tracks
            .iter()
            .filter(|(_, t)| t.enabled)
            .map(|(i, t)| (*i, t))
    }

    pub fn has_cut_segments(&self) -> bool {
        self.cut_segments.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn is_stream_copy(&self) -> bool {
        matches!(self.mode, EncodingMode::Copy)
    }

    fn is_audio_only(&self) -> bool {
        self.video.is_none() && !self.no_audio
    }
}

/// What a job fundamentally is, derived from its options and source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Conversion,
    FastCut,
    Download,
    Remux,
    AudioExport,
}

impl JobKind {
    /// Classification rules: a stream-copy job is a fast cut when ranges
    /// are cut, a download when the source is remote, otherwise a remux;
    /// audio-only requests are exports; everything else is a conversion.
    pub fn classify(options: &ConversionOptions, source_is_remote: bool) -> JobKind {
        if options.is_audio_only() && options.is_stream_copy() {
            return JobKind::AudioExport;
        }
        if options.is_stream_copy() {
            if options.has_cut_segments() {
                return JobKind::FastCut;
            }
            if source_is_remote {
                return JobKind::Download;
            }
            return JobKind::Remux;
        }
        JobKind::Conversion
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    NotStarted,
    Running,
    Paused,
    Completed,
    Canceled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

/// One queued unit of work: a source, a destination and captured options.
/// The queue owner mutates the state from engine callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: u64,
    pub source: MediaInfo,
    pub destination: PathBuf,
    pub options: ConversionOptions,
    pub kind: JobKind,
    pub state: JobState,
}

impl Job {
    pub fn new(
        id: u64,
        source: MediaInfo,
        destination: PathBuf,
        options: ConversionOptions,
        source_is_remote: bool,
    ) -> Self {
        let kind = JobKind::classify(&options, source_is_remote);
        Self {
            id,
            source,
            destination,
            options,
            kind,
            state: JobState::NotStarted,
        }
    }

    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::encoders::{AudioCodec, VideoCodec};
    use crate::interval::TimeInterval;

    fn copy_options() -> ConversionOptions {
        let mut options = ConversionOptions::new(
            Some(VideoEncoder::new(VideoCodec::X264)),
            EncodingMode::Copy,
        );
        options.audio_tracks.insert(
            0,
            AudioTrackOptions {
                enabled: true,
                encoder: AudioEncoder::new(AudioCodec::Copy),
            },
        );
        options
    }

    fn with_segments(mut options: ConversionOptions) -> ConversionOptions {
        let mut segments = TimeIntervalCollection::for_media(Duration::from_secs(120));
        segments.add(
            TimeInterval::new(Duration::from_secs(10), Duration::from_secs(40)).expect("interval"),
        );
        options.cut_segments = Some(segments);
        options
    }

    #[test]
    fn stream_copy_with_segments_is_fast_cut() {
        let options = with_segments(copy_options());
        assert_eq!(JobKind::classify(&options, false), JobKind::FastCut);
    }

    #[test]
    fn stream_copy_without_segments_is_remux_or_download() {
        let options = copy_options();
        assert_eq!(JobKind::classify(&options, false), JobKind::Remux);
        assert_eq!(JobKind::classify(&options, true), JobKind::Download);
    }

    #[test]
    fn audio_only_copy_is_audio_export() {
        let mut options = copy_options();
        options.video = None;
        assert_eq!(JobKind::classify(&options, false), JobKind::AudioExport);
    }

    #[test]
    fn encoding_request_is_conversion() {
        let mut options = copy_options();
        options.mode = EncodingMode::ConstantQuality;
        assert_eq!(JobKind::classify(&options, false), JobKind::Conversion);
        let options = with_segments(options);
        assert_eq!(JobKind::classify(&options, true), JobKind::Conversion);
    }

    #[test]
    fn enabled_tracks_preserve_map_order() {
        let mut options = copy_options();
        options.audio_tracks.insert(
            2,
            AudioTrackOptions {
                enabled: true,
                encoder: AudioEncoder::new(AudioCodec::Aac),
            },
        );
        options.audio_tracks.insert(
            1,
            AudioTrackOptions {
                enabled: false,
                encoder: AudioEncoder::new(AudioCodec::Aac),
            },
        );
        let indices: Vec<u32> = options.enabled_audio_tracks().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Paused.is_terminal());
    }
}
