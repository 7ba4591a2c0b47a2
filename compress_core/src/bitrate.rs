//! Bitrate planning
//!
//! Turns "shrink to N% of the original size" (or an absolute size in bytes)
//! into ffmpeg rate-control values:
//!
//! ```text
//! target_size  = floor(original_size * pct / 100)
//! bitrate      = target_size * 8 / duration
//! maxrate      = bitrate * 1.5
//! bufsize      = bitrate * 2
//! ```

use crate::errors::{CompressError, Result};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub const MAX_RATE_FACTOR: f64 = 1.5;
pub const BUFFER_SIZE_FACTOR: f64 = 2.0;

/// Rate-control values for one compression run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompressionPlan {
    pub target_size_bytes: u64,
    pub duration_secs: f64,
    pub target_bitrate_bps: f64,
    pub max_rate_bps: f64,
    pub buffer_size_bits: f64,
}

impl CompressionPlan {
    /// `-b:v`, `-maxrate:v`, `-bufsize:v` with whole bits per second.
    pub fn rate_args(&self) -> [String; 6] {
        [
            "-b:v".to_string(),
            format!("{:.0}", self.target_bitrate_bps),
            "-maxrate:v".to_string(),
            format!("{:.0}", self.max_rate_bps),
            "-bufsize:v".to_string(),
            format!("{:.0}", self.buffer_size_bits),
        ]
    }
}

impl std::fmt::Display for CompressionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "target {} over {:.2}s → {} (max {}, buffer {})",
            format_bytes(self.target_size_bytes),
            self.duration_secs,
            format_bitrate(self.target_bitrate_bps),
            format_bitrate(self.max_rate_bps),
            format_bitrate(self.buffer_size_bits),
        )
    }
}

/// Plan against the on-disk size of `source`.
pub fn plan(source: &Path, target_percentage: f64, duration_secs: f64) -> Result<CompressionPlan> {
    let original_size = std::fs::metadata(source)
        .map_err(|e| CompressError::Io {
            path: source.to_path_buf(),
            source: e,
        })?
        .len();

    plan_for_size(original_size, target_percentage, duration_secs)
}

/// Plan for a known original size. Percentages above 100 are allowed.
pub fn plan_for_size(
    original_size: u64,
    target_percentage: f64,
    duration_secs: f64,
) -> Result<CompressionPlan> {
    if !target_percentage.is_finite() || target_percentage <= 0.0 {
        return Err(CompressError::Planning(format!(
            "target percentage must be a positive number, got {}",
            target_percentage
        )));
    }

    let target_size_bytes = (original_size as f64 * target_percentage / 100.0).floor() as u64;
    debug!(original_size, target_percentage, target_size_bytes, "Target size from percentage");
    plan_for_target_bytes(target_size_bytes, duration_secs)
}

/// Plan for an absolute output size, e.g. an upload limit.
pub fn plan_for_target_bytes(target_size_bytes: u64, duration_secs: f64) -> Result<CompressionPlan> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(CompressError::Planning(format!(
            "video duration must be positive, got {}",
            duration_secs
        )));
    }
    if target_size_bytes == 0 {
        return Err(CompressError::Planning(
            "target size is 0 bytes".to_string(),
        ));
    }

    let target_bitrate_bps = (target_size_bytes as f64 * 8.0) / duration_secs;
    let plan = CompressionPlan {
        target_size_bytes,
        duration_secs,
        target_bitrate_bps,
        max_rate_bps: target_bitrate_bps * MAX_RATE_FACTOR,
        buffer_size_bits: target_bitrate_bps * BUFFER_SIZE_FACTOR,
    };

    debug!(
        target_size = plan.target_size_bytes,
        bitrate = plan.target_bitrate_bps,
        "Compression planned"
    );
    Ok(plan)
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000.0 {
        format!("{:.2} Mbps", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.1} kbps", bps / 1_000.0)
    } else {
        format!("{:.0} bps", bps)
    }
}
