#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use clipforge::engine::{ConversionEvent, EventSink};
use clipforge::probe::MediaInfo;
use clipforge::units::{Bitrate, Resolution};

/// Write an executable shell script standing in for the encoder binary.
/// Each test bakes its own paths into the script body so tests can run in
/// parallel without shared environment.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, body).expect("write fake encoder script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("make script executable");
    path
}

/// Event sink that records everything the engine reports.
pub fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<ConversionEvent>>>) {
    let events: Arc<Mutex<Vec<ConversionEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink: EventSink = Arc::new(move |event| {
        sink_events.lock().push(event);
    });
    (sink, events)
}

/// A plausible 1080p30 source of the given length; the file itself is a
/// stub since the fake encoder never reads it.
pub fn media_info(dir: &Path, duration_secs: u64) -> MediaInfo {
    let path = dir.join("in.mp4");
    fs::write(&path, b"not a real video").expect("write stub input");
    MediaInfo {
        path,
        duration: Duration::from_secs(duration_secs),
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

pub fn percentages(events: &[ConversionEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            ConversionEvent::Progress(p) => Some(p.percentage),
            _ => None,
        })
        .collect()
}

pub fn completed_count(events: &[ConversionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConversionEvent::Completed))
        .count()
}

pub fn aborted_messages(events: &[ConversionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ConversionEvent::Aborted(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}
