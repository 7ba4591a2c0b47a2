//! FFprobe wrapper module
//!
//! Container duration lookup used to turn a target size into a bitrate.

use crate::errors::{CompressError, Result};
use crate::logging::log_external_tool;
use std::path::Path;
use std::process::Command;
use std::time::Instant;
use tracing::info;

/// Arguments preceding the input path.
pub const DURATION_ARGS: [&str; 8] = [
    "-v",
    "error",
    "-select_streams",
    "v:0",
    "-show_entries",
    "format=duration",
    "-of",
    "default=noprint_wrappers=1:nokey=1",
];

/// Container-level duration of `path` in seconds.
pub fn get_duration(ffprobe: &Path, path: &Path) -> Result<f64> {
    info!(
        command = %format!("{} {} \"{}\"", ffprobe.display(), DURATION_ARGS.join(" "), path.display()),
        "Running ffprobe command"
    );

    let start = Instant::now();
    let output = Command::new(ffprobe)
        .args(DURATION_ARGS)
        .arg(path)
        .output()
        .map_err(|e| CompressError::invocation(ffprobe.display().to_string(), e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    log_external_tool(
        &ffprobe.display().to_string(),
        &DURATION_ARGS,
        &stderr,
        output.status.code(),
        start.elapsed(),
    );

    parse_duration_output(path, output.status.success(), &stdout, &stderr)
}

/// Interpret a finished ffprobe duration query.
pub fn parse_duration_output(
    path: &Path,
    success: bool,
    stdout: &str,
    stderr: &str,
) -> Result<f64> {
    if !success {
        let message = if stderr.trim().is_empty() {
            "ffprobe exited with an error and no output".to_string()
        } else {
            format!("Error running ffprobe: {}", stderr.trim())
        };
        return Err(CompressError::probe(path, message));
    }

    let text = stdout.trim();
    if text.is_empty() {
        return Err(CompressError::probe(
            path,
            "Failed to get video duration. Output from ffprobe is empty.",
        ));
    }

    match text.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() => Ok(seconds),
        _ => Err(CompressError::probe(
            path,
            format!("Invalid duration value returned: '{}'", text),
        )),
    }
}
