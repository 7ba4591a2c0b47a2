//! Compression core for the `compress` tool
//!
//! Shrinks a video toward a percentage of its original size by driving ffmpeg:
//! - External tool discovery (ffmpeg / ffprobe)
//! - Hardware encoder selection from `ffmpeg -hwaccels`
//! - Duration lookup via ffprobe
//! - Target-size to bitrate planning
//! - Synchronous and progress-streaming ffmpeg sessions
//!
//! ```rust,ignore
//! use compress_core::{detect_best_codec, get_duration, locate_tools, plan, run};
//! use compress_core::{CompressionRequest, RunMode};
//!
//! let tools = locate_tools();
//! let codec = detect_best_codec(tools.ffmpeg()?)?;
//! let request = CompressionRequest::new("clip.mp4", 50.0, codec);
//! let duration = get_duration(tools.ffprobe()?, &request.source)?;
//! let plan = plan(&request.source, request.target_percentage, duration)?;
//! let outcome = run(&tools, &request, &plan, RunMode::Synchronous)?;
//! ```

pub mod bitrate;
pub mod errors;
pub mod ffmpeg_process;
pub mod ffprobe;
pub mod gpu_accel;
pub mod logging;
pub mod session;
pub mod tools;

pub use bitrate::{plan, plan_for_size, plan_for_target_bytes, CompressionPlan};
pub use errors::{CompressError, Result};
pub use ffprobe::get_duration;
pub use gpu_accel::{detect_best_codec, select_codec, CodecChoice};
pub use session::{
    build_command, output_path_for, run, spawn, CompressionEvent, CompressionHandle,
    CompressionOutcome, CompressionRequest, RunMode,
};
pub use tools::{locate_tools, locate_tools_in, ToolPaths};
