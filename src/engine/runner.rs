//! Encoder process spawning and stream reading.
//!
//! Spawns the encoder as a child process, reads its stdout (the progress
//! protocol) and stderr (human-readable error text) on background threads,
//! and maps the exit status onto the engine's error taxonomy. The child
//! handle lives in a slot shared with the engine so stop/kill/pause can
//! reach it from other threads.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use crate::error::AppError;

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// The engine's single active child process. One conversion at a time.
pub type ChildSlot = Arc<Mutex<Option<Child>>>;

fn read_lines<R: std::io::Read>(
    reader: R,
    stopped: &AtomicBool,
    mut on_line: impl FnMut(&str),
) {
    let mut stream_reader = BufReader::new(reader);
    let mut line_buf = Vec::with_capacity(256);
    while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
        if stopped.load(Ordering::Relaxed) {
            break;
        }
        let line = std::str::from_utf8(&line_buf)
            .unwrap_or("")
            .trim_end_matches(['\n', '\r']);
        on_line(line);
        line_buf.clear();
    }
}

/// Run one encoder invocation and block until it exits.
///
/// `on_progress_line` receives every stdout line (the `key=value` protocol).
/// Stderr is collected ring-capped and becomes the failure text. A child
/// that disappears from the slot (hard kill) or exits while `stopped` is
/// set maps to [`AppError::Aborted`]; any other non-zero exit maps to
/// [`AppError::FfmpegFailed`] carrying the collected stderr.
pub fn run_encoder_blocking<F>(
    ffmpeg: &Path,
    args: Vec<String>,
    slot: &ChildSlot,
    stopped: &Arc<AtomicBool>,
    mut on_progress_line: F,
) -> Result<(), AppError>
where
    F: FnMut(&str) + Send,
{
    let input_arg = args
        .iter()
        .position(|a| a == "-i")
        .and_then(|i| args.get(i + 1));
    log::debug!(
        target: "clipforge::engine::runner",
        "Spawning encoder: path={}, input={:?}, output={:?}",
        ffmpeg.display(),
        input_arg,
        args.last()
    );

    let mut cmd = Command::new(ffmpeg);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn encoder: {}", e))?;

    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stdout"));
        }
    };
    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::from("Failed to capture stderr"));
        }
    };

    {
        let mut guard = slot.lock();
        *guard = Some(child);
    }

    let stderr_buffer: Mutex<Vec<u8>> = Mutex::new(Vec::new());

    thread::scope(|scope| {
        scope.spawn(|| {
            read_lines(stdout, stopped, |line| on_progress_line(line));
        });
        scope.spawn(|| {
            read_lines(stderr, stopped, |line| {
                let mut guard = stderr_buffer.lock();
                guard.extend_from_slice(line.as_bytes());
                guard.push(b'\n');
                if guard.len() > MAX_STDERR_BYTES {
                    let excess = guard.len() - MAX_STDERR_BYTES;
                    guard.drain(..excess);
                }
            });
        });
    });

    let child = {
        let mut guard = slot.lock();
        guard.take()
    };

    let status = match child {
        Some(mut c) => c.wait().map_err(|e| e.to_string())?,
        None => {
            log::warn!(
                target: "clipforge::engine::runner",
                "Encoder process was terminated externally"
            );
            return Err(AppError::aborted());
        }
    };

    let stderr_bytes = stderr_buffer.into_inner();
    let stderr_str = String::from_utf8_lossy(&stderr_bytes).to_string();

    if stopped.load(Ordering::Relaxed) {
        log::info!(
            target: "clipforge::engine::runner",
            "Encoder exited after a requested stop"
        );
        return Err(AppError::aborted());
    }

    if status.success() {
        log::info!(
            target: "clipforge::engine::runner",
            "Encoder completed successfully"
        );
        return Ok(());
    }

    match status.code() {
        // no exit code: killed by a signal, treated as stopped
        None => Err(AppError::aborted()),
        Some(code) => {
            let err_preview = stderr_str
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .join("; ");
            log::error!(
                target: "clipforge::engine::runner",
                "Encoder failed (code={}): {}",
                code,
                err_preview
            );
            Err(AppError::FfmpegFailed {
                code,
                stderr: stderr_str,
            })
        }
    }
}

/// Current pid of the active child, if any.
pub fn active_pid(slot: &ChildSlot) -> Option<u32> {
    slot.lock().as_ref().map(Child::id)
}

/// Hard-kill the active child. The output is likely truncated.
pub fn kill_active(slot: &ChildSlot) {
    let mut guard = slot.lock();
    if let Some(mut child) = guard.take() {
        log::info!(
            target: "clipforge::engine::runner",
            "Killing encoder process"
        );
        let _ = child.kill();
        let _ = child.wait();
    }
}
