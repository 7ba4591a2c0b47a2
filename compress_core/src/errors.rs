use std::path::PathBuf;
use thiserror::Error;

/// Failure classes of the compression pipeline.
///
/// `ToolNotFound` is the soft one: the locator never returns it, callers
/// raise it themselves after checking an empty `ToolPaths` field.
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("External tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("Failed to invoke {tool}: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("FFprobe failed for '{}': {message}", .path.display())]
    Probe { path: PathBuf, message: String },

    #[error("Cannot plan compression: {0}")]
    Planning(String),

    #[error("FFmpeg exited with code {exit_code:?}: {message}")]
    Transcode {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("IO error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompressError {
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        CompressError::ToolNotFound { tool: tool.into() }
    }

    pub fn probe(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CompressError::Probe {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        CompressError::ToolInvocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Everything except a missing tool aborts the current compression.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CompressError::ToolNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, CompressError>;
