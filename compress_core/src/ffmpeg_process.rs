//! FFmpeg process handling
//!
//! ## Pipe deadlock
//!
//! When both stdout and stderr are piped but only stdout is read, ffmpeg
//! blocks as soon as its stderr buffer (typically 64KB) fills, and the stdout
//! reader then waits forever. `FfmpegProcess` drains stderr on its own thread.
//!
//! ## Progress
//!
//! With `-progress pipe:1 -nostats` ffmpeg writes `key=value` blocks to
//! stdout. Only `out_time_ms=<microseconds>` is used; everything else passes
//! through. `ProgressUpdates` turns a line source into a finite sequence of
//! non-decreasing percentages.

use crate::errors::{CompressError, Result};
use std::io::{BufRead, BufReader, Split};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Appended to the transcoder invocation to enable the progress stream.
pub const PROGRESS_ARGS: [&str; 3] = ["-progress", "pipe:1", "-nostats"];

/// Key of the elapsed-output-time progress field (microseconds despite the name).
pub const PROGRESS_MARKER: &str = "out_time_ms=";

// ═══════════════════════════════════════════════════════════════
// FfmpegProcess
// ═══════════════════════════════════════════════════════════════

/// Child ffmpeg process with stderr drained in the background.
pub struct FfmpegProcess {
    child: Child,
    stderr_thread: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    /// Spawn `cmd` with stdout and stderr piped.
    pub fn spawn(cmd: &mut Command) -> Result<Self> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        info!(command = %format!("{:?}", cmd), "Executing FFmpeg command");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| CompressError::invocation(&program, e.to_string()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CompressError::invocation(&program, "failed to capture stderr"))?;

        let stderr_thread = thread::spawn(move || {
            let mut buf = String::new();
            for line in BufReader::new(stderr).split(b'\n').map_while(|l| l.ok()) {
                let line = String::from_utf8_lossy(&line);
                trace!(line = %line.trim_end(), "ffmpeg stderr");
                buf.push_str(line.trim_end_matches('\r'));
                buf.push('\n');
            }
            buf
        });

        Ok(Self {
            child,
            stderr_thread: Some(stderr_thread),
        })
    }

    /// Take stdout for progress reading. `None` once taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for exit and collect everything written to stderr.
    pub fn wait_with_output(mut self) -> Result<(ExitStatus, String)> {
        // Anything still on stdout is unread passthrough; drop the pipe so a
        // blocked writer gets EPIPE instead of hanging.
        drop(self.child.stdout.take());

        let status = self
            .child
            .wait()
            .map_err(|e| CompressError::invocation("ffmpeg", format!("wait failed: {}", e)))?;
        let stderr = self
            .stderr_thread
            .take()
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default();

        if status.success() {
            info!(exit_code = status.code(), "FFmpeg process completed successfully");
            debug!(stderr_output = %stderr, "FFmpeg stderr output");
        } else {
            error!(
                exit_code = status.code(),
                stderr_output = %stderr,
                "FFmpeg process failed"
            );
        }

        Ok((status, stderr))
    }
}

// ═══════════════════════════════════════════════════════════════
// Progress tracking
// ═══════════════════════════════════════════════════════════════

/// What a single output line meant for progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLine {
    /// New, higher percentage.
    Update(u8),
    /// Marker parsed but percentage did not increase.
    Unchanged,
    /// Marker present but value unparsable (e.g. `N/A`).
    Malformed,
    /// Any other passthrough line.
    Other,
}

/// Converts `out_time_ms` markers into non-decreasing 0-100 percentages.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_us: f64,
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            total_us: duration_secs * 1_000_000.0,
            last: None,
        }
    }

    /// Last emitted percentage (0 before any marker).
    pub fn percent(&self) -> u8 {
        self.last.unwrap_or(0)
    }

    pub fn feed(&mut self, line: &str) -> ProgressLine {
        let Some(value) = line.trim().strip_prefix(PROGRESS_MARKER) else {
            return ProgressLine::Other;
        };
        let Ok(elapsed_us) = value.trim().parse::<i64>() else {
            return ProgressLine::Malformed;
        };

        let percent = self.to_percent(elapsed_us);
        match self.last {
            Some(last) if percent <= last => ProgressLine::Unchanged,
            _ => {
                self.last = Some(percent);
                ProgressLine::Update(percent)
            }
        }
    }

    fn to_percent(&self, elapsed_us: i64) -> u8 {
        if self.total_us <= 0.0 || !self.total_us.is_finite() {
            return 0;
        }
        let ratio = elapsed_us.max(0) as f64 / self.total_us;
        (ratio * 100.0).clamp(0.0, 100.0) as u8
    }

    /// Lazily read `reader` line by line, yielding each new percentage.
    pub fn updates<R: BufRead>(self, reader: R) -> ProgressUpdates<R> {
        ProgressUpdates {
            lines: reader.split(b'\n'),
            tracker: self,
        }
    }
}

/// Iterator returned by [`ProgressTracker::updates`]. Ends when the reader does.
pub struct ProgressUpdates<R> {
    lines: Split<R>,
    tracker: ProgressTracker,
}

impl<R> ProgressUpdates<R> {
    pub fn percent(&self) -> u8 {
        self.tracker.percent()
    }
}

impl<R: BufRead> Iterator for ProgressUpdates<R> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Progress stream read failed, stopping");
                    return None;
                }
            };
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');

            match self.tracker.feed(line) {
                ProgressLine::Update(percent) => return Some(percent),
                ProgressLine::Malformed => {
                    warn!(line = %line, "Skipping unparsable progress line")
                }
                ProgressLine::Unchanged => {}
                ProgressLine::Other => trace!(line = %line, "ffmpeg output"),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Error extraction
// ═══════════════════════════════════════════════════════════════

/// Most meaningful line of ffmpeg stderr: the last line mentioning an error,
/// otherwise the last non-progress line.
pub fn format_ffmpeg_error(stderr: &str) -> String {
    if let Some(error_line) = stderr
        .lines()
        .rev()
        .find(|line| line.contains("Error") || line.contains("error"))
    {
        return error_line.trim().to_string();
    }

    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| {
            !line.is_empty()
                && !line.starts_with("frame=")
                && !line.starts_with("fps=")
                && !line.starts_with("size=")
        })
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown FFmpeg error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tracker_percent_from_microseconds() {
        let mut tracker = ProgressTracker::new(100.0);
        assert_eq!(tracker.feed("out_time_ms=50000000"), ProgressLine::Update(50));
        assert_eq!(tracker.percent(), 50);
    }

    #[test]
    fn test_tracker_clamps_and_never_decreases() {
        let mut tracker = ProgressTracker::new(10.0);
        assert_eq!(tracker.feed("out_time_ms=-5"), ProgressLine::Update(0));
        assert_eq!(tracker.feed("out_time_ms=7000000"), ProgressLine::Update(70));
        assert_eq!(tracker.feed("out_time_ms=3000000"), ProgressLine::Unchanged);
        assert_eq!(tracker.feed("out_time_ms=7000000"), ProgressLine::Unchanged);
        assert_eq!(tracker.feed("out_time_ms=99000000"), ProgressLine::Update(100));
        assert_eq!(tracker.percent(), 100);
    }

    #[test]
    fn test_tracker_line_kinds() {
        let mut tracker = ProgressTracker::new(10.0);
        assert_eq!(tracker.feed("frame=12"), ProgressLine::Other);
        assert_eq!(tracker.feed("out_time=00:00:01.000000"), ProgressLine::Other);
        assert_eq!(tracker.feed("out_time_ms=N/A"), ProgressLine::Malformed);
        assert_eq!(tracker.feed("progress=continue"), ProgressLine::Other);
    }

    #[test]
    fn test_updates_iterates_block_output() {
        let stream = "frame=1\r\nout_time_ms=N/A\nout_time_us=0\nout_time_ms=1000000\nprogress=continue\n\
                      out_time_ms=1000000\nout_time_ms=2500000\nout_time_ms=4000000\nprogress=end\n";
        let updates = ProgressTracker::new(4.0).updates(Cursor::new(stream));
        let percents: Vec<u8> = updates.collect();
        assert_eq!(percents, vec![25, 62, 100]);
    }

    #[test]
    fn test_updates_survives_invalid_utf8() {
        let mut bytes = b"out_time_ms=1000000\n\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(b"out_time_ms=2000000\n");
        let percents: Vec<u8> = ProgressTracker::new(2.0)
            .updates(Cursor::new(bytes))
            .collect();
        assert_eq!(percents, vec![50, 100]);
    }

    #[test]
    fn test_zero_duration_reports_zero() {
        let mut tracker = ProgressTracker::new(0.0);
        assert_eq!(tracker.feed("out_time_ms=1000"), ProgressLine::Update(0));
        assert_eq!(tracker.feed("out_time_ms=2000"), ProgressLine::Unchanged);
    }

    #[test]
    fn test_failure_summary_prefers_last_error_line() {
        // Hardware encoder selected on a machine whose GPU went away.
        let stderr = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':\n\
                      [h264_nvenc @ 0x55d0c0] OpenEncodeSessionEx failed: no encode device (1)\n\
                      [h264_nvenc @ 0x55d0c0] No capable devices found\n\
                      Error initializing output stream 0:0 -- Error while opening encoder\n\
                      Conversion failed!\n";
        assert_eq!(
            format_ffmpeg_error(stderr),
            "Error initializing output stream 0:0 -- Error while opening encoder"
        );
    }

    #[test]
    fn test_failure_summary_skips_stat_lines() {
        let stderr = "clip.mp4: Invalid data found when processing input\n\
                      frame=  240 fps=60 q=-1.0 size=    2048kB time=00:00:08.00\n";
        assert_eq!(
            format_ffmpeg_error(stderr),
            "clip.mp4: Invalid data found when processing input"
        );
    }

    #[test]
    fn test_failure_summary_without_stderr() {
        assert_eq!(format_ffmpeg_error(""), "Unknown FFmpeg error");
        assert_eq!(format_ffmpeg_error("\n  \nframe=1 fps=0\n"), "Unknown FFmpeg error");
    }
}
