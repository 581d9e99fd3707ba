use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use clipforge::engine::{ConversionEngine, ConversionEvent, EventSink};
use clipforge::error::AppError;
use clipforge::interval::TimeInterval;
use clipforge::job::ConversionOptions;
use clipforge::sidecar_api;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
enum JobKind {
    Conversion,
    AudioExport,
}

#[derive(Debug, Clone, Copy)]
struct ActiveJob {
    job_id: u64,
    kind: JobKind,
}

#[derive(Clone)]
struct JobSlot {
    active: Arc<Mutex<Option<ActiveJob>>>,
    next_id: Arc<AtomicU64>,
}

impl JobSlot {
    fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin(&self, kind: JobKind) -> Result<ActiveJob, AppError> {
        let mut guard = self.active.lock();
        if let Some(existing) = *guard {
            return Err(AppError::invalid_request(format!(
                "Another job is already running (jobId={})",
                existing.job_id
            )));
        }
        let job = ActiveJob {
            job_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        *guard = Some(job);
        Ok(job)
    }

    fn finish(&self, job_id: u64) {
        let mut guard = self.active.lock();
        if guard.is_some_and(|active| active.job_id == job_id) {
            *guard = None;
        }
    }

    fn current(&self) -> Option<ActiveJob> {
        *self.active.lock()
    }
}

struct ActiveJobGuard {
    slot: JobSlot,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.slot.finish(self.job_id);
    }
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    serde_json::to_writer(&mut *guard, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    guard.write_all(b"\n")?;
    guard.flush()
}

fn emit_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line(writer, &message);
}

/// One engine for the process lifetime, created on the first job so a
/// missing FFmpeg surfaces as a request error rather than a startup crash.
struct EngineCell {
    engine: Mutex<Option<Arc<ConversionEngine>>>,
    writer: SharedWriter,
    jobs: JobSlot,
}

impl EngineCell {
    fn new(writer: SharedWriter, jobs: JobSlot) -> Self {
        Self {
            engine: Mutex::new(None),
            writer,
            jobs,
        }
    }

    fn get(&self) -> Result<Arc<ConversionEngine>, AppError> {
        let mut guard = self.engine.lock();
        if let Some(engine) = guard.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let ffmpeg = sidecar_api::discover_ffmpeg()?;
        let writer = Arc::clone(&self.writer);
        let jobs = self.jobs.clone();
        let events: EventSink = Arc::new(move |event| {
            let Some(job) = jobs.current() else {
                return;
            };
            match event {
                ConversionEvent::Progress(progress) => emit_event(
                    &writer,
                    "job.progress",
                    json!({
                        "jobId": job.job_id,
                        "kind": job.kind,
                        "progress": progress,
                    }),
                ),
                ConversionEvent::Completed => emit_event(
                    &writer,
                    "job.complete",
                    json!({ "jobId": job.job_id, "kind": job.kind }),
                ),
                ConversionEvent::Aborted(message) => emit_event(
                    &writer,
                    "job.error",
                    json!({
                        "jobId": job.job_id,
                        "kind": job.kind,
                        "message": message,
                    }),
                ),
            }
        });
        let engine = Arc::new(ConversionEngine::new(ffmpeg, events));
        *guard = Some(Arc::clone(&engine));
        Ok(engine)
    }

    fn existing(&self) -> Option<Arc<ConversionEngine>> {
        self.engine.lock().as_ref().map(Arc::clone)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum InspectParams {
    Metadata {
        input_path: PathBuf,
    },
    Keyframes {
        input_path: PathBuf,
        position_seconds: f64,
    },
    CommandPreview {
        input_path: PathBuf,
        output_path: PathBuf,
        options: ConversionOptions,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertParams {
    input_path: PathBuf,
    output_path: PathBuf,
    options: ConversionOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractAudioParams {
    input_path: PathBuf,
    output_path: PathBuf,
    track: u32,
    start_seconds: Option<f64>,
    end_seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CancelParams {
    #[serde(default)]
    kill: bool,
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_request(format!("Invalid params payload: {}", e)))
}

fn to_result_value<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::invalid_request(format!("Failed to serialize result: {}", e)))
}

fn dispatch_sync(method: &str, params: Value, engines: &EngineCell) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_result_value(sidecar_api::capabilities()?),
        "media.inspect" => match params_from_value::<InspectParams>(params)? {
            InspectParams::Metadata { input_path } => {
                to_result_value(sidecar_api::inspect_media(&input_path)?)
            }
            InspectParams::Keyframes {
                input_path,
                position_seconds,
            } => to_result_value(sidecar_api::keyframe_hints(
                &input_path,
                Duration::from_secs_f64(position_seconds.max(0.0)),
            )?),
            InspectParams::CommandPreview {
                input_path,
                output_path,
                options,
            } => {
                let info = sidecar_api::inspect_media(&input_path)?;
                Ok(Value::String(sidecar_api::preview_command(
                    &info,
                    &options,
                    &output_path,
                )))
            }
        },
        "media.cancel" => {
            let parsed: CancelParams = if params.is_null() {
                CancelParams::default()
            } else {
                params_from_value(params)?
            };
            match (engines.existing(), engines.jobs.current()) {
                (Some(engine), Some(job)) => {
                    if parsed.kill {
                        engine.kill();
                    } else {
                        engine.stop();
                    }
                    Ok(json!({ "cancelled": true, "jobId": job.job_id }))
                }
                _ => Ok(json!({ "cancelled": false, "jobId": Value::Null })),
            }
        }
        "media.pause" => {
            if let Some(engine) = engines.existing() {
                engine.pause();
            }
            Ok(json!({ "state": engines.existing().map(|e| e.state()) }))
        }
        "media.resume" => {
            if let Some(engine) = engines.existing() {
                engine.resume();
            }
            Ok(json!({ "state": engines.existing().map(|e| e.state()) }))
        }
        _ => Err(AppError::invalid_request(format!(
            "Unknown method: {}",
            method
        ))),
    }
}

fn handle_async_job(request: RpcRequest, writer: &SharedWriter, engines: &EngineCell) {
    let kind = if request.method == "media.extractAudio" {
        JobKind::AudioExport
    } else {
        JobKind::Conversion
    };

    let job = match engines.jobs.begin(kind) {
        Ok(job) => job,
        Err(err) => {
            let _ = write_json_line(
                writer,
                &RpcFailure {
                    id: request.id,
                    error: err.to_string(),
                },
            );
            return;
        }
    };
    let _guard = ActiveJobGuard {
        slot: engines.jobs.clone(),
        job_id: job.job_id,
    };

    let result = run_job(request.method.as_str(), request.params, engines);
    let response = match result {
        Ok(value) => write_json_line(
            writer,
            &RpcSuccess {
                id: request.id,
                result: value,
            },
        ),
        Err(err) => write_json_line(
            writer,
            &RpcFailure {
                id: request.id,
                error: err.to_string(),
            },
        ),
    };
    if let Err(err) = response {
        log::error!(target: "clipforge::sidecar", "Failed to write response: {}", err);
    }
}

fn run_job(method: &str, params: Value, engines: &EngineCell) -> Result<Value, AppError> {
    let engine = engines.get()?;
    match method {
        "media.convert" => {
            let parsed: ConvertParams = params_from_value(params)?;
            let info = sidecar_api::inspect_media(&parsed.input_path)?;
            let state = engine.convert(&info, &parsed.output_path, &parsed.options);
            Ok(json!({ "state": state }))
        }
        "media.extractAudio" => {
            let parsed: ExtractAudioParams = params_from_value(params)?;
            let info = sidecar_api::inspect_media(&parsed.input_path)?;
            let range = match (parsed.start_seconds, parsed.end_seconds) {
                (Some(start), Some(end)) => Some(TimeInterval::new(
                    Duration::from_secs_f64(start.max(0.0)),
                    Duration::from_secs_f64(end.max(0.0)),
                )?),
                _ => None,
            };
            let state = engine.extract_audio(&info, &parsed.output_path, parsed.track, range);
            Ok(json!({ "state": state }))
        }
        _ => Err(AppError::invalid_request(format!(
            "Unknown method: {}",
            method
        ))),
    }
}

fn is_async_request(method: &str) -> bool {
    matches!(method, "media.convert" | "media.extractAudio")
}

fn main() -> io::Result<()> {
    env_logger::init();

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobSlot::new();
    let engines = Arc::new(EngineCell::new(Arc::clone(&stdout), jobs));
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let _ = write_json_line(
                    &stdout,
                    &RpcFailure {
                        id: 0,
                        error: format!("Invalid input stream: {}", err),
                    },
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let _ = write_json_line(
                    &stdout,
                    &RpcFailure {
                        id: 0,
                        error: format!("Invalid request: {}", err),
                    },
                );
                continue;
            }
        };

        if is_async_request(&request.method) {
            let writer = Arc::clone(&stdout);
            let engines = Arc::clone(&engines);
            workers.push(thread::spawn(move || {
                handle_async_job(request, &writer, &engines);
            }));
        } else {
            let response = match dispatch_sync(&request.method, request.params, &engines) {
                Ok(result) => write_json_line(
                    &stdout,
                    &RpcSuccess {
                        id: request.id,
                        result,
                    },
                ),
                Err(err) => write_json_line(
                    &stdout,
                    &RpcFailure {
                        id: request.id,
                        error: err.to_string(),
                    },
                ),
            };
            if let Err(err) = response {
                log::error!(target: "clipforge::sidecar", "Failed to write response: {}", err);
            }
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
