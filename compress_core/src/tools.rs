//! External tool discovery
//!
//! Resolves `ffmpeg` and `ffprobe` once at startup. Absence is not an error
//! here: an empty field means the capability is unavailable and callers must
//! check before use (`ToolPaths::ffmpeg()` / `ToolPaths::ffprobe()`).

use crate::errors::{CompressError, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FFMPEG_BIN: &str = "ffmpeg";
pub const FFPROBE_BIN: &str = "ffprobe";

/// Resolved transcoder and prober locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolPaths {
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

impl ToolPaths {
    pub fn new(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    pub fn ffmpeg(&self) -> Result<&Path> {
        self.ffmpeg
            .as_deref()
            .ok_or_else(|| CompressError::tool_not_found(FFMPEG_BIN))
    }

    pub fn ffprobe(&self) -> Result<&Path> {
        self.ffprobe
            .as_deref()
            .ok_or_else(|| CompressError::tool_not_found(FFPROBE_BIN))
    }

    pub fn is_complete(&self) -> bool {
        self.ffmpeg.is_some() && self.ffprobe.is_some()
    }
}

/// Search the process `PATH`.
pub fn locate_tools() -> ToolPaths {
    resolve(|name| which::which(name).ok())
}

/// Search an explicit `PATH`-style list instead of the environment.
pub fn locate_tools_in<P: AsRef<OsStr>>(search_path: P) -> ToolPaths {
    let cwd = std::env::current_dir().unwrap_or_default();
    resolve(|name| which::which_in(name, Some(search_path.as_ref()), &cwd).ok())
}

fn resolve<F>(find: F) -> ToolPaths
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let Some(ffmpeg) = find(FFMPEG_BIN) else {
        warn!("FFmpeg not found in search path, compression unavailable");
        return ToolPaths::default();
    };
    info!(path = %ffmpeg.display(), "FFmpeg found in search path");

    if let Some(ffprobe) = find(FFPROBE_BIN) {
        info!(path = %ffprobe.display(), "FFprobe found in search path");
        return ToolPaths::new(Some(ffmpeg), Some(ffprobe));
    }

    match colocated_ffprobe(&ffmpeg) {
        Some(ffprobe) => {
            info!(path = %ffprobe.display(), "FFprobe found next to FFmpeg");
            ToolPaths::new(Some(ffmpeg), Some(ffprobe))
        }
        None => {
            warn!(
                ffmpeg = %ffmpeg.display(),
                "FFprobe not found in search path or FFmpeg directory"
            );
            ToolPaths::new(Some(ffmpeg), None)
        }
    }
}

/// Look beside the ffmpeg binary, and beside its symlink target if it is one.
fn colocated_ffprobe(ffmpeg: &Path) -> Option<PathBuf> {
    let name = format!("{}{}", FFPROBE_BIN, std::env::consts::EXE_SUFFIX);
    let resolved = std::fs::canonicalize(ffmpeg).ok();

    let found = [Some(ffmpeg), resolved.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(Path::parent)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file());
    found
}
