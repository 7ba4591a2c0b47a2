//! Logging
//!
//! tracing-based setup shared by the library and the `compress` binary:
//! - a daily-rolling log file in the system temp directory (configurable)
//! - human-readable output on stderr
//! - pruning of old log files
//! - structured records for every external tool call
//!
//! # Examples
//!
//! ```no_run
//! use compress_core::logging::{init_logging, LogConfig};
//!
//! init_logging("compress", LogConfig::default()).expect("Failed to initialize logging");
//! tracing::info!("Program started");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for log files (system temp dir by default)
    pub log_dir: PathBuf,
    /// Number of log files kept after pruning
    pub max_files: usize,
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Extra cap on the stderr layer only; the file still gets everything.
    /// Set while a progress bar owns the terminal.
    pub stderr_level: Option<Level>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            stderr_level: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_stderr_level(mut self, level: Level) -> Self {
        self.stderr_level = Some(level);
        self
    }

    fn stderr_filter(&self) -> LevelFilter {
        self.stderr_level
            .map(LevelFilter::from_level)
            .unwrap_or(LevelFilter::TRACE)
    }

    /// Filter directive applied when `RUST_LOG` is not set.
    pub fn default_directive(&self, program_name: &str) -> String {
        format!(
            "compress_core={level},{program}={level}",
            level = self.level,
            program = program_name
        )
    }
}

/// Install the global subscriber. Log file: `{log_dir}/{program_name}.log.<date>`.
///
/// Fails if the log directory cannot be created or a subscriber is already set.
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive(program_name)));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_line_number(false)
        .with_filter(config.stderr_filter());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(
        program = program_name,
        log_dir = ?config.log_dir,
        log_file = log_file_name,
        max_files = config.max_files,
        level = ?config.level,
        "Logging system initialized"
    );

    cleanup_old_logs(&config.log_dir, program_name, config.max_files)?;

    Ok(())
}

/// Whether `file_name` was written by the appender for `program_name`:
/// `{program}.log` or `{program}.log.<suffix>`.
fn is_program_log(file_name: &str, program_name: &str) -> bool {
    match file_name
        .strip_prefix(program_name)
        .and_then(|rest| rest.strip_prefix(".log"))
    {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Delete all but the `max_files` newest logs of `program_name`.
fn cleanup_old_logs(log_dir: &Path, program_name: &str, max_files: usize) -> Result<()> {
    let mut logs: Vec<(std::time::SystemTime, PathBuf)> = std::fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_program_log(&entry.file_name().to_string_lossy(), program_name))
        .filter_map(|entry| {
            let meta = entry.metadata().ok().filter(|m| m.is_file())?;
            Some((meta.modified().ok()?, entry.path()))
        })
        .collect();

    logs.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    for (_, path) in logs.into_iter().skip(max_files) {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = ?path, "Pruned log file"),
            Err(e) => tracing::warn!(path = ?path, error = %e, "Could not prune log file"),
        }
    }

    Ok(())
}

/// Record one external tool call (ffmpeg, ffprobe).
pub fn log_external_tool(
    tool_name: &str,
    args: &[&str],
    output: &str,
    exit_code: Option<i32>,
    duration: std::time::Duration,
) {
    let command = format!("{} {}", tool_name, args.join(" "));

    match exit_code {
        Some(0) => {
            tracing::debug!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = 0,
                output = %output,
                "External tool completed successfully"
            );
        }
        Some(code) => {
            tracing::error!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = code,
                output = %output,
                "External tool failed"
            );
        }
        None => {
            tracing::error!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                output = %output,
                "External tool terminated without exit code"
            );
        }
    }
}
