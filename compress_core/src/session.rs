//! Compression session
//!
//! One ffmpeg run toward a planned bitrate. Two modes:
//! - `RunMode::Synchronous`: block until ffmpeg exits, report success only.
//! - `RunMode::Streaming`: enable `-progress pipe:1`, forward every new
//!   percentage as `ProgressUpdated`, then check the exit code and send
//!   `Completed` as the last event.
//!
//! `spawn` runs a session on a dedicated worker thread so a UI never blocks
//! on the transcoder.

use crate::bitrate::CompressionPlan;
use crate::errors::{CompressError, Result};
use crate::ffmpeg_process::{format_ffmpeg_error, FfmpegProcess, ProgressTracker, PROGRESS_ARGS};
use crate::gpu_accel::CodecChoice;
use crate::tools::ToolPaths;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::ffi::OsString;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub const OUTPUT_PREFIX: &str = "compressed_";

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionRequest {
    pub source: PathBuf,
    pub target_percentage: f64,
    pub codec: CodecChoice,
}

impl CompressionRequest {
    pub fn new(source: impl Into<PathBuf>, target_percentage: f64, codec: CodecChoice) -> Self {
        Self {
            source: source.into(),
            target_percentage,
            codec,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_percentage.is_finite() || self.target_percentage <= 0.0 {
            return Err(CompressError::Planning(format!(
                "target percentage must be a positive number, got {}",
                self.target_percentage
            )));
        }
        let metadata = std::fs::metadata(&self.source).map_err(|e| CompressError::Io {
            path: self.source.clone(),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(CompressError::Planning(format!(
                "not a regular file: {}",
                self.source.display()
            )));
        }
        Ok(())
    }
}

/// Notifications from a streaming run, in read order. `Completed` is always last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CompressionEvent {
    ProgressUpdated { percent: u8 },
    Completed { success: bool },
}

#[derive(Debug, Clone)]
pub enum RunMode {
    Synchronous,
    Streaming(Sender<CompressionEvent>),
}

impl RunMode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, RunMode::Streaming(_))
    }
}

/// Result of a finished ffmpeg run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionOutcome {
    pub output_path: PathBuf,
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last observed percentage (streaming mode only).
    pub final_percent: Option<u8>,
    /// Most relevant stderr line when ffmpeg failed.
    pub error_summary: Option<String>,
}

impl CompressionOutcome {
    /// Turn an unsuccessful run into `CompressError::Transcode`.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(CompressError::Transcode {
                exit_code: self.exit_code,
                message: self
                    .error_summary
                    .unwrap_or_else(|| "Unknown FFmpeg error".to_string()),
            })
        }
    }
}

/// `<source dir>/compressed_<source file name>`
pub fn output_path_for(source: &Path) -> Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        CompressError::Planning(format!("source has no file name: {}", source.display()))
    })?;

    let mut name = OsString::from(OUTPUT_PREFIX);
    name.push(file_name);
    Ok(source.with_file_name(name))
}

/// Full ffmpeg argument list (without the program) for a run.
pub fn build_args(
    request: &CompressionRequest,
    plan: &CompressionPlan,
    output: &Path,
    streaming: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(20);
    args.push("-y".into());
    if streaming {
        args.extend(PROGRESS_ARGS.into_iter().map(OsString::from));
    }
    args.push("-i".into());
    args.push(request.source.as_os_str().to_owned());
    args.push("-vcodec".into());
    args.push(request.codec.ffmpeg_name().into());
    args.extend(plan.rate_args().into_iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// Ready-to-spawn ffmpeg command and the output path it writes.
pub fn build_command(
    ffmpeg: &Path,
    request: &CompressionRequest,
    plan: &CompressionPlan,
    streaming: bool,
) -> Result<(Command, PathBuf)> {
    let output = output_path_for(&request.source)?;
    let mut cmd = Command::new(ffmpeg);
    cmd.args(build_args(request, plan, &output, streaming));
    Ok((cmd, output))
}

/// Run one compression to completion on the current thread.
pub fn run(
    tools: &ToolPaths,
    request: &CompressionRequest,
    plan: &CompressionPlan,
    mode: RunMode,
) -> Result<CompressionOutcome> {
    match mode {
        RunMode::Synchronous => run_synchronous(tools, request, plan),
        RunMode::Streaming(events) => {
            let result = run_streaming(tools, request, plan, &events);
            let success = matches!(&result, Ok(outcome) if outcome.success);
            notify(&events, CompressionEvent::Completed { success });
            result
        }
    }
}

fn run_synchronous(
    tools: &ToolPaths,
    request: &CompressionRequest,
    plan: &CompressionPlan,
) -> Result<CompressionOutcome> {
    request.validate()?;
    let (mut cmd, output_path) = build_command(tools.ffmpeg()?, request, plan, false)?;

    let mut process = FfmpegProcess::spawn(&mut cmd)?;
    if let Some(mut stdout) = process.take_stdout() {
        let mut sink = Vec::new();
        if let Err(e) = stdout.read_to_end(&mut sink) {
            debug!(error = %e, "Failed to drain ffmpeg stdout");
        }
    }
    let (status, stderr) = process.wait_with_output()?;

    Ok(finish(status, &stderr, output_path, None))
}

fn run_streaming(
    tools: &ToolPaths,
    request: &CompressionRequest,
    plan: &CompressionPlan,
    events: &Sender<CompressionEvent>,
) -> Result<CompressionOutcome> {
    request.validate()?;
    let (mut cmd, output_path) = build_command(tools.ffmpeg()?, request, plan, true)?;

    let mut process = FfmpegProcess::spawn(&mut cmd)?;
    let stdout = process
        .take_stdout()
        .ok_or_else(|| CompressError::invocation("ffmpeg", "failed to capture stdout"))?;

    let mut last_percent = None;
    for percent in ProgressTracker::new(plan.duration_secs).updates(BufReader::new(stdout)) {
        debug!(percent, "Compression progress");
        last_percent = Some(percent);
        notify(events, CompressionEvent::ProgressUpdated { percent });
    }

    let (status, stderr) = process.wait_with_output()?;
    Ok(finish(status, &stderr, output_path, last_percent))
}

fn finish(
    status: ExitStatus,
    stderr: &str,
    output_path: PathBuf,
    final_percent: Option<u8>,
) -> CompressionOutcome {
    let success = status.success();
    if success {
        info!(output = %output_path.display(), "Compressed video saved");
    } else {
        warn!(
            output = %output_path.display(),
            exit_code = ?status.code(),
            "Compression failed, output file may be incomplete"
        );
    }

    CompressionOutcome {
        success,
        exit_code: status.code(),
        final_percent,
        error_summary: (!success).then(|| format_ffmpeg_error(stderr)),
        output_path,
    }
}

fn notify(events: &Sender<CompressionEvent>, event: CompressionEvent) {
    if events.send(event).is_err() {
        debug!(?event, "No observer listening for compression events");
    }
}

/// A streaming compression running on its own worker thread.
pub struct CompressionHandle {
    events: Receiver<CompressionEvent>,
    worker: JoinHandle<Result<CompressionOutcome>>,
}

impl CompressionHandle {
    /// Event stream; disconnects after `Completed`.
    pub fn events(&self) -> &Receiver<CompressionEvent> {
        &self.events
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker. Pending events remain readable until the handle is dropped.
    pub fn join(self) -> Result<CompressionOutcome> {
        self.worker
            .join()
            .map_err(|_| CompressError::invocation("worker", "compression worker panicked"))?
    }
}

/// Start a streaming compression on a dedicated worker thread.
pub fn spawn(
    tools: Arc<ToolPaths>,
    request: CompressionRequest,
    plan: CompressionPlan,
) -> Result<CompressionHandle> {
    let (tx, rx) = unbounded();
    let worker = thread::Builder::new()
        .name("compress-worker".to_string())
        .spawn(move || run(&tools, &request, &plan, RunMode::Streaming(tx)))
        .map_err(|e| CompressError::invocation("worker", e.to_string()))?;

    Ok(CompressionHandle { events: rx, worker })
}
