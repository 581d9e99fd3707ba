//! FFmpeg argument construction. Pure and deterministic: identical inputs
//! must produce a byte-identical argument vector, which is the unit-tested
//! contract of this module.

use std::path::Path;
use std::time::Duration;

use crate::encoders::EncodingMode;
use crate::filters::{Filter, Filtergraph};
use crate::interval::TimeInterval;
use crate::job::ConversionOptions;
use crate::probe::MediaInfo;

/// Everything one subprocess invocation depends on.
pub struct ConversionArgs<'a> {
    pub source: &'a MediaInfo,
    pub options: &'a ConversionOptions,
    /// Effective mode for this invocation; differs from the options' mode
    /// across the two-pass flip.
    pub mode: EncodingMode,
    /// Time restriction of this invocation, absent for whole-file runs.
    pub range: Option<TimeInterval>,
    /// Pass-log prefix, present only for first/second pass invocations.
    pub pass_log: Option<&'a Path>,
    /// Filters appended after the user's own (segment join fades).
    pub extra_filters: &'a [Filter],
    pub output: &'a Path,
}

fn fmt_secs(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

fn push_seek(args: &mut Vec<String>, range: Option<TimeInterval>) {
    if let Some(range) = range {
        args.push("-ss".into());
        args.push(fmt_secs(range.start()));
        args.push("-to".into());
        args.push(fmt_secs(range.end()));
    }
}

fn is_mp4_output(output: &Path) -> bool {
    output
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("mp4"))
}

fn wants_video(ctx: &ConversionArgs) -> bool {
    ctx.options.video.is_some()
        && ctx.mode != EncodingMode::NoEncoding
        && ctx.source.has_video()
}

fn wants_audio(ctx: &ConversionArgs) -> bool {
    !ctx.options.no_audio && ctx.mode != EncodingMode::FirstPass
}

/// Compose the full argument vector for one conversion invocation, in the
/// fixed order: progress flag, seek, inputs, maps, filter graph, encoder
/// flags (video then audio), container fixups, output.
pub fn build_conversion_args(ctx: &ConversionArgs) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-nostdin".into(),
        "-y".into(),
        "-progress".into(),
        "pipe:1".into(),
    ];

    // main input, re-seeked to the segment range
    push_seek(&mut args, ctx.range);
    args.push("-i".into());
    args.push(ctx.source.path.to_string_lossy().to_string());

    // detached audio input gets the identical restriction
    let external_audio = ctx.source.external_audio_path.as_ref();
    if let Some(audio_path) = external_audio {
        push_seek(&mut args, ctx.range);
        args.push("-i".into());
        args.push(audio_path.to_string_lossy().to_string());
    }

    let audio_input = if external_audio.is_some() { 1 } else { 0 };

    // stream maps: video, enabled audio tracks in collection order, subtitles
    if wants_video(ctx) {
        args.push("-map".into());
        args.push("0:v:0".into());
    }
    if wants_audio(ctx) {
        for (source_index, _) in ctx.options.enabled_audio_tracks() {
            args.push("-map".into());
            args.push(format!("{}:a:{}", audio_input, source_index));
        }
    }
    let map_subtitles = wants_video(ctx)
        && ctx.mode != EncodingMode::FirstPass
        && ctx.source.subtitle_stream_count > 0;
    if map_subtitles {
        args.push("-map".into());
        args.push("0:s?".into());
    }

    // filter graph, only when something renders
    if ctx.mode != EncodingMode::Copy {
        let mut graph = Filtergraph::new();
        for filter in &ctx.options.filters {
            graph.add(0, 0, filter.clone());
        }
        for filter in ctx.extra_filters {
            graph.add(0, 0, filter.clone());
        }
        let rendered = graph.render();
        if !rendered.is_empty() {
            args.push("-filter_complex".into());
            args.push(rendered);
        }
    }

    // encoder flags, video then audio
    match &ctx.options.video {
        Some(encoder) if ctx.mode != EncodingMode::NoEncoding => {
            args.extend(encoder.args(ctx.mode));
            if let (Some(log), true) = (ctx.pass_log, ctx.mode.is_two_pass()) {
                args.push("-passlogfile".into());
                args.push(log.to_string_lossy().to_string());
            }
        }
        _ => args.push("-vn".into()),
    }
    if !wants_audio(ctx) {
        args.push("-an".into());
    } else {
        for (ordinal, (_, track)) in ctx.options.enabled_audio_tracks().enumerate() {
            args.extend(track.encoder.args(ordinal));
        }
    }

    if ctx.mode == EncodingMode::FirstPass {
        // analysis pass: discard the output container entirely
        args.push("-f".into());
        args.push("null".into());
        args.push("-".into());
        return args;
    }

    // container fixups
    if is_mp4_output(ctx.output) {
        if map_subtitles {
            args.push("-c:s".into());
            args.push("mov_text".into());
        }
        args.push("-movflags".into());
        args.push("+faststart".into());
    }

    args.push("-max_muxing_queue_size".into());
    args.push("1024".into());
    args.push(ctx.output.to_string_lossy().to_string());
    args
}

/// The final stream-copy run joining segment parts through the concat
/// demuxer.
pub fn build_concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-y".into(),
        "-progress".into(),
        "pipe:1".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().to_string(),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        output.to_string_lossy().to_string(),
    ]
}

/// Stream-copy one audio track into its own container, optionally clipped.
pub fn build_audio_extract_args(
    source: &MediaInfo,
    track: u32,
    range: Option<TimeInterval>,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-nostdin".into(),
        "-y".into(),
        "-progress".into(),
        "pipe:1".into(),
    ];
    push_seek(&mut args, range);
    args.push("-i".into());
    let input = source
        .external_audio_path
        .as_ref()
        .unwrap_or(&source.path);
    args.push(input.to_string_lossy().to_string());
    args.push("-map".into());
    args.push(format!("0:a:{}", track));
    args.push("-vn".into());
    args.push("-c:a".into());
    args.push("copy".into());
    args.push(output.to_string_lossy().to_string());
    args
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::encoders::{AudioCodec, AudioEncoder, VideoCodec, VideoEncoder};
    use crate::job::AudioTrackOptions;
    use crate::units::{Bitrate, Resolution};

    fn source() -> MediaInfo {
        MediaInfo {
            path: PathBuf::from("/in.mp4"),
            duration: Duration::from_secs(120),
            framerate: 30.0,
            resolution: Resolution::new(1920, 1080),
            video_codec: Some("h264".into()),
            video_bitrate: Some(Bitrate::from_kbps(5000.0)),
            container: Some("mov,mp4,m4a,3gp,3g2,mj2".into()),
            audio_tracks: Vec::new(),
            subtitle_stream_count: 0,
            color: None,
            external_audio_path: None,
        }
    }

    fn options() -> ConversionOptions {
        ConversionOptions::new(
            Some(VideoEncoder::new(VideoCodec::X264)),
            EncodingMode::ConstantQuality,
        )
    }

    fn ctx<'a>(
        source: &'a MediaInfo,
        options: &'a ConversionOptions,
        output: &'a Path,
    ) -> ConversionArgs<'a> {
        ConversionArgs {
            source,
            options,
            mode: options.mode,
            range: None,
            pass_log: None,
            extra_filters: &[],
            output,
        }
    }

    #[test]
    fn constant_quality_whole_file_golden_vector() {
        let source = source();
        let options = options();
        let output = PathBuf::from("/out.mp4");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        assert_eq!(
            args,
            vec![
                "-nostdin",
                "-y",
                "-progress",
                "pipe:1",
                "-i",
                "/in.mp4",
                "-map",
                "0:v:0",
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-crf",
                "28",
                "-movflags",
                "+faststart",
                "-max_muxing_queue_size",
                "1024",
                "/out.mp4",
            ]
        );
    }

    #[test]
    fn identical_inputs_build_identical_args() {
        let source = source();
        let options = options();
        let output = PathBuf::from("/out.mp4");
        let a = build_conversion_args(&ctx(&source, &options, &output));
        let b = build_conversion_args(&ctx(&source, &options, &output));
        assert_eq!(a, b);
    }

    #[test]
    fn range_seeks_before_the_input() {
        let source = source();
        let options = options();
        let output = PathBuf::from("/out.mp4");
        let mut c = ctx(&source, &options, &output);
        c.range = Some(
            TimeInterval::new(Duration::from_secs(10), Duration::from_secs(40)).expect("interval"),
        );
        let args = build_conversion_args(&c);
        let ss = args.iter().position(|a| a == "-ss").expect("-ss");
        let i = args.iter().position(|a| a == "-i").expect("-i");
        assert!(ss < i, "seek must precede the input");
        assert_eq!(args[ss + 1], "10.000");
        assert_eq!(args[ss + 2], "-to");
        assert_eq!(args[ss + 3], "40.000");
    }

    #[test]
    fn external_audio_gets_the_same_restriction() {
        let mut source = source();
        source.external_audio_path = Some(PathBuf::from("/in.audio.m4a"));
        let mut options = options();
        options.audio_tracks.insert(
            0,
            AudioTrackOptions {
                enabled: true,
                encoder: AudioEncoder::new(AudioCodec::Aac),
            },
        );
        let output = PathBuf::from("/out.mp4");
        let mut c = ctx(&source, &options, &output);
        c.range = Some(
            TimeInterval::new(Duration::from_secs(5), Duration::from_secs(15)).expect("interval"),
        );
        let args = build_conversion_args(&c);
        assert_eq!(args.iter().filter(|a| *a == "-ss").count(), 2);
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        // audio maps point at the second input
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a:0"));
    }

    #[test]
    fn audio_tracks_map_in_collection_order_with_output_ordinals() {
        let mut source = source();
        source.audio_tracks = vec![];
        let mut options = options();
        for (index, enabled) in [(0u32, true), (1, false), (2, true)] {
            options.audio_tracks.insert(
                index,
                AudioTrackOptions {
                    enabled,
                    encoder: AudioEncoder::new(AudioCodec::Aac),
                },
            );
        }
        let output = PathBuf::from("/out.mp4");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        let maps: Vec<&str> = args
            .windows(2)
            .filter(|w| w[0] == "-map" && w[1].contains(":a:"))
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(maps, vec!["0:a:0", "0:a:2"]);
        assert!(args.contains(&"-c:a:0".to_string()));
        assert!(args.contains(&"-c:a:1".to_string()));
        assert!(!args.contains(&"-c:a:2".to_string()));
    }

    #[test]
    fn no_audio_replaces_tracks_with_an() {
        let mut options = options();
        options.no_audio = true;
        options.audio_tracks.insert(
            0,
            AudioTrackOptions {
                enabled: true,
                encoder: AudioEncoder::new(AudioCodec::Aac),
            },
        );
        let source = source();
        let output = PathBuf::from("/out.mp4");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-c:a")));
    }

    #[test]
    fn first_pass_discards_output_and_audio() {
        let source = source();
        let mut options = options();
        options.mode = EncodingMode::FirstPass;
        if let Some(v) = options.video.as_mut() {
            v.bitrate = Some(Bitrate::from_kbps(4000.0));
        }
        options.audio_tracks.insert(
            0,
            AudioTrackOptions {
                enabled: true,
                encoder: AudioEncoder::new(AudioCodec::Aac),
            },
        );
        let output = PathBuf::from("/out.mp4");
        let log = PathBuf::from("/out_2pass_0");
        let mut c = ctx(&source, &options, &output);
        c.pass_log = Some(&log);
        let args = build_conversion_args(&c);

        assert!(args.contains(&"-an".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-c:a")));
        let f = args.iter().position(|a| a == "-f").expect("-f");
        assert_eq!(args[f + 1], "null");
        assert_eq!(args.last().map(String::as_str), Some("-"));
        let log_flag = args
            .iter()
            .position(|a| a == "-passlogfile")
            .expect("-passlogfile");
        assert_eq!(args[log_flag + 1], "/out_2pass_0");
    }

    #[test]
    fn filter_graph_flag_only_when_something_renders() {
        let source = source();
        let mut options = options();
        options.filters.push(Filter::Crop {
            left: 0,
            top: 0,
            right: 0,
            bottom: 0,
        });
        let output = PathBuf::from("/out.mp4");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        assert!(!args.contains(&"-filter_complex".to_string()));

        options.filters.push(Filter::Scale {
            resolution: Resolution::new(1280, 720),
        });
        let args = build_conversion_args(&ctx(&source, &options, &output));
        let fc = args
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("-filter_complex");
        assert_eq!(args[fc + 1], "[0:0]scale=1280:720");
    }

    #[test]
    fn extra_filters_append_after_user_filters() {
        let source = source();
        let mut options = options();
        options.filters.push(Filter::Fps { rate: 30.0 });
        let output = PathBuf::from("/out.mp4");
        let extra = [Filter::Fade {
            direction: crate::filters::FadeDirection::In,
            duration: 0.5,
            start: 0.0,
        }];
        let mut c = ctx(&source, &options, &output);
        c.extra_filters = &extra;
        let args = build_conversion_args(&c);
        let fc = args
            .iter()
            .position(|a| a == "-filter_complex")
            .expect("-filter_complex");
        assert_eq!(args[fc + 1], "[0:0]fps=30,fade=t=in:st=0:d=0.5");
    }

    #[test]
    fn subtitles_transcode_for_mp4_only_when_present() {
        let mut source = source();
        source.subtitle_stream_count = 1;
        let options = options();
        let output = PathBuf::from("/out.mp4");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:s?"));
        assert!(args.windows(2).any(|w| w[0] == "-c:s" && w[1] == "mov_text"));

        let output = PathBuf::from("/out.mkv");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:s?"));
        assert!(!args.contains(&"-c:s".to_string()));
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn copy_mode_skips_the_filter_graph() {
        let source = source();
        let mut options = options();
        options.mode = EncodingMode::Copy;
        options.filters.push(Filter::Fps { rate: 30.0 });
        let output = PathBuf::from("/out.mp4");
        let args = build_conversion_args(&ctx(&source, &options, &output));
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));
    }

    #[test]
    fn concat_args_stream_copy_the_list() {
        let args = build_concat_args(Path::new("/videos/concat.txt"), Path::new("/videos/out.mp4"));
        assert_eq!(
            args,
            vec![
                "-nostdin",
                "-y",
                "-progress",
                "pipe:1",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/videos/concat.txt",
                "-map",
                "0",
                "-c",
                "copy",
                "/videos/out.mp4",
            ]
        );
    }

    #[test]
    fn audio_extract_stream_copies_one_track() {
        let source = source();
        let args = build_audio_extract_args(
            &source,
            1,
            Some(
                TimeInterval::new(Duration::from_secs(2), Duration::from_secs(8))
                    .expect("interval"),
            ),
            Path::new("/out.m4a"),
        );
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:a:1"));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "copy"));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-ss").count(), 1);
    }

    #[test]
    fn audio_extract_prefers_the_detached_audio_source() {
        let mut source = source();
        source.external_audio_path = Some(PathBuf::from("/in.audio.m4a"));
        let args = build_audio_extract_args(&source, 0, None, Path::new("/out.m4a"));
        assert!(args.contains(&"/in.audio.m4a".to_string()));
        assert!(!args.contains(&"/in.mp4".to_string()));
    }
}
