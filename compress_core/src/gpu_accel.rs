//! Hardware encoder selection
//!
//! | Accelerator keyword | Encoder      |
//! |---------------------|--------------|
//! | cuda / nvenc        | h264_nvenc   |
//! | qsv                 | h264_qsv     |
//! | amf                 | h264_amf     |
//! | (none)              | libx264      |
//!
//! The keyword list is checked top to bottom, so NVENC wins whenever it is
//! present alongside others.

use crate::errors::{CompressError, Result};
use crate::logging::log_external_tool;
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};

const HWACCELS_ARGS: [&str; 2] = ["-hide_banner", "-hwaccels"];

/// Encoder picked for a compression run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecChoice {
    /// NVIDIA GPU (NVENC)
    Nvenc,
    /// Intel Quick Sync Video
    Qsv,
    /// AMD Advanced Media Framework
    Amf,
    /// CPU encoding
    Software,
}

impl CodecChoice {
    pub const ALL: [CodecChoice; 4] = [
        CodecChoice::Nvenc,
        CodecChoice::Qsv,
        CodecChoice::Amf,
        CodecChoice::Software,
    ];

    /// Value passed to ffmpeg's `-vcodec`.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            CodecChoice::Nvenc => "h264_nvenc",
            CodecChoice::Qsv => "h264_qsv",
            CodecChoice::Amf => "h264_amf",
            CodecChoice::Software => "libx264",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, CodecChoice::Software)
    }
}

impl std::fmt::Display for CodecChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecChoice::Nvenc => write!(f, "NVIDIA NVENC"),
            CodecChoice::Qsv => write!(f, "Intel QSV"),
            CodecChoice::Amf => write!(f, "AMD AMF"),
            CodecChoice::Software => write!(f, "None (CPU)"),
        }
    }
}

impl FromStr for CodecChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nvenc" | "nvidia" | "cuda" | "h264_nvenc" => Ok(CodecChoice::Nvenc),
            "qsv" | "intel" | "h264_qsv" => Ok(CodecChoice::Qsv),
            "amf" | "amd" | "h264_amf" => Ok(CodecChoice::Amf),
            "software" | "cpu" | "libx264" | "x264" => Ok(CodecChoice::Software),
            other => Err(format!(
                "unknown codec '{}', expected one of: nvenc, qsv, amf, software",
                other
            )),
        }
    }
}

/// Map `ffmpeg -hwaccels` text to an encoder.
pub fn select_codec(hwaccels: &str) -> CodecChoice {
    let text = hwaccels.to_lowercase();

    if text.contains("cuda") || text.contains("nvenc") {
        CodecChoice::Nvenc
    } else if text.contains("qsv") {
        CodecChoice::Qsv
    } else if text.contains("amf") {
        CodecChoice::Amf
    } else {
        CodecChoice::Software
    }
}

/// Ask ffmpeg which hardware accelerators it was built with and pick an encoder.
///
/// A spawn failure is an error. A non-zero exit is treated as "no
/// accelerators" and yields the software encoder.
pub fn detect_best_codec(ffmpeg: &Path) -> Result<CodecChoice> {
    let start = Instant::now();
    let output = Command::new(ffmpeg)
        .args(HWACCELS_ARGS)
        .output()
        .map_err(|e| CompressError::invocation(ffmpeg.display().to_string(), e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    log_external_tool(
        &ffmpeg.display().to_string(),
        &HWACCELS_ARGS,
        &stdout,
        output.status.code(),
        start.elapsed(),
    );

    if !output.status.success() {
        warn!(
            exit_code = ?output.status.code(),
            "ffmpeg -hwaccels failed, assuming no hardware acceleration"
        );
        return Ok(CodecChoice::Software);
    }

    let codec = select_codec(&stdout);
    info!(codec = codec.ffmpeg_name(), accel = %codec, "Selected encoder");
    Ok(codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NVIDIA_HWACCELS: &str = "Hardware acceleration methods:\nvdpau\ncuda\nvaapi\nqsv\n";

    #[test]
    fn test_select_codec_priority() {
        let cases: &[(&str, CodecChoice)] = &[
            (NVIDIA_HWACCELS, CodecChoice::Nvenc),
            ("Hardware acceleration methods:\nNVENC\n", CodecChoice::Nvenc),
            ("Hardware acceleration methods:\nqsv\nd3d11va\n", CodecChoice::Qsv),
            ("Hardware acceleration methods:\nAMF\ndxva2\n", CodecChoice::Amf),
            ("Hardware acceleration methods:\nqsv\namf\n", CodecChoice::Qsv),
            ("Hardware acceleration methods:\nvaapi\nvdpau\n", CodecChoice::Software),
            ("Hardware acceleration methods:\n", CodecChoice::Software),
            ("", CodecChoice::Software),
        ];

        for (text, expected) in cases {
            assert_eq!(select_codec(text), *expected, "select_codec({:?})", text);
        }
    }

    #[test]
    fn test_ffmpeg_names() {
        assert_eq!(CodecChoice::Nvenc.ffmpeg_name(), "h264_nvenc");
        assert_eq!(CodecChoice::Qsv.ffmpeg_name(), "h264_qsv");
        assert_eq!(CodecChoice::Amf.ffmpeg_name(), "h264_amf");
        assert_eq!(CodecChoice::Software.ffmpeg_name(), "libx264");
        assert!(!CodecChoice::Software.is_hardware());
    }

    #[test]
    fn test_from_str_accepts_aliases() {
        assert_eq!("NVENC".parse::<CodecChoice>(), Ok(CodecChoice::Nvenc));
        assert_eq!("h264_qsv".parse::<CodecChoice>(), Ok(CodecChoice::Qsv));
        assert_eq!("amd".parse::<CodecChoice>(), Ok(CodecChoice::Amf));
        assert_eq!(" cpu ".parse::<CodecChoice>(), Ok(CodecChoice::Software));
        assert!("hevc".parse::<CodecChoice>().is_err());
    }

    #[test]
    fn test_missing_binary_is_invocation_error() {
        let result = detect_best_codec(Path::new("/nonexistent/ffmpeg_xyz"));
        assert!(matches!(result, Err(CompressError::ToolInvocation { .. })));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// NVENC wins regardless of surrounding text or case.
        #[test]
        fn prop_nvenc_always_wins(
            prefix in "[a-zA-Z0-9 \n]{0,40}",
            suffix in "[a-zA-Z0-9 \n]{0,40}",
            upper in any::<bool>()
        ) {
            let keyword = if upper { "NVENC" } else { "nvenc" };
            let text = format!("{}{}{}", prefix, keyword, suffix);
            prop_assert_eq!(select_codec(&text), CodecChoice::Nvenc);
        }

        /// Text without any known keyword falls back to software.
        #[test]
        fn prop_unknown_text_is_software(text in "[b-z \n]{0,60}") {
            prop_assume!(!text.contains("cuda") && !text.contains("nvenc")
                && !text.contains("qsv") && !text.contains("amf"));
            prop_assert_eq!(select_codec(&text), CodecChoice::Software);
        }
    }
}
