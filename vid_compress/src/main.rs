use clap::error::ErrorKind;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use compress_core::logging::{init_logging, LogConfig};
use compress_core::{
    detect_best_codec, get_duration, locate_tools, output_path_for, plan, plan_for_target_bytes,
    run, spawn,
    CodecChoice, CompressionEvent, CompressionOutcome, CompressionPlan, CompressionRequest,
    RunMode, ToolPaths,
};

const USAGE: &str = "Usage: compress <file_path> <target_percentage>";

#[derive(Parser, Debug)]
#[command(name = "compress")]
#[command(version, about = "Shrink a video toward a percentage of its original size", long_about = None)]
struct Cli {
    /// Video file to compress
    #[arg(value_name = "FILE_PATH")]
    file_path: PathBuf,

    /// Target size as a percentage of the original (e.g. 50)
    #[arg(value_name = "TARGET_PERCENTAGE", value_parser = parse_percentage, allow_negative_numbers = true)]
    target_percentage: f64,

    /// Aim for an absolute output size in MiB; the percentage is then ignored
    #[arg(long, value_name = "MB", value_parser = parse_target_size_mb)]
    target_size_mb: Option<f64>,

    /// Stream ffmpeg progress and show a progress bar
    #[arg(long)]
    progress: bool,

    /// Skip hardware probing and use this encoder (nvenc, qsv, amf, software)
    #[arg(long, value_parser = parse_codec)]
    codec: Option<CodecChoice>,

    /// Print the plan without running ffmpeg
    #[arg(long)]
    dry_run: bool,

    /// Print the plan / outcome as JSON
    #[arg(long)]
    json: bool,

    /// Log directory (system temp dir by default)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_percentage(s: &str) -> Result<f64, String> {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        Ok(v) => Err(format!("target percentage must be positive, got {}", v)),
        Err(_) => Err("Please provide a valid number for target percentage.".to_string()),
    }
}

fn parse_target_size_mb(s: &str) -> Result<f64, String> {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        Ok(v) => Err(format!("target size must be positive, got {}", v)),
        Err(_) => Err(format!("invalid target size: {:?}", s)),
    }
}

fn target_size_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0).floor() as u64
}

fn parse_codec(s: &str) -> Result<CodecChoice, String> {
    s.parse()
}

fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };

    let mut log_config = LogConfig::default();
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    if cli.verbose {
        log_config = log_config.with_level(Level::DEBUG);
    }
    if cli.progress {
        // The bar owns the terminal; info lines still reach the log file.
        log_config = log_config.with_stderr_level(Level::WARN);
    }
    if let Err(e) = init_logging("compress", log_config) {
        eprintln!("⚠️ Logging disabled: {:#}", e);
    }

    execute(&cli, locate_tools())
}

fn execute(cli: &Cli, tools: ToolPaths) -> anyhow::Result<()> {
    let ffmpeg = tools.ffmpeg()?;
    let ffprobe = tools.ffprobe()?;

    let codec = match cli.codec {
        Some(codec) => codec,
        None => detect_best_codec(ffmpeg)?,
    };
    let request = CompressionRequest::new(&cli.file_path, cli.target_percentage, codec);
    request.validate()?;

    let duration = get_duration(ffprobe, &request.source)?;
    let plan = match cli.target_size_mb {
        Some(mb) => plan_for_target_bytes(target_size_bytes(mb), duration)?,
        None => plan(&request.source, request.target_percentage, duration)?,
    };
    info!(%plan, encoder = codec.ffmpeg_name(), "Compression plan ready");

    if cli.dry_run {
        print_plan(&request, &plan, cli.json)?;
        return Ok(());
    }

    let outcome = if cli.progress {
        run_with_progress_bar(Arc::new(tools), request, plan)?
    } else {
        run(&tools, &request, &plan, RunMode::Synchronous)?
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.success {
        println!("Compressed video saved as {}", outcome.output_path.display());
    }

    outcome.into_result()?;
    Ok(())
}

fn print_plan(request: &CompressionRequest, plan: &CompressionPlan, json: bool) -> anyhow::Result<()> {
    let output_path = output_path_for(&request.source)?;
    if json {
        let report = serde_json::json!({
            "request": request,
            "plan": plan,
            "output_path": output_path,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Input:   {}", request.source.display());
        println!("Encoder: {} ({})", request.codec.ffmpeg_name(), request.codec);
        println!("Plan:    {}", plan);
        println!("Output:  {}", output_path.display());
    }
    Ok(())
}

fn run_with_progress_bar(
    tools: Arc<ToolPaths>,
    request: CompressionRequest,
    plan: CompressionPlan,
) -> anyhow::Result<CompressionOutcome> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {prefix:.cyan.bold} ▕{bar:30.green/black}▏ {percent:>3}% • ⏱️ {elapsed_precise} • {msg}",
        )
        .map(|style| style.progress_chars("━━─"))
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix("Compressing");
    bar.set_message(request.codec.ffmpeg_name());
    bar.enable_steady_tick(Duration::from_millis(120));

    let handle = spawn(tools, request, plan)?;
    for event in handle.events().iter() {
        match event {
            CompressionEvent::ProgressUpdated { percent } => bar.set_position(u64::from(percent)),
            CompressionEvent::Completed { success: true } => bar.finish_with_message("done"),
            CompressionEvent::Completed { success: false } => bar.abandon_with_message("failed"),
        }
    }

    Ok(handle.join()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::try_parse_from(["compress", "clip.mp4", "50"]).unwrap();
        assert_eq!(cli.file_path, PathBuf::from("clip.mp4"));
        assert_eq!(cli.target_percentage, 50.0);
        assert!(!cli.progress);
        assert!(cli.codec.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "compress", "clip.mp4", "12.5", "--progress", "--codec", "qsv", "--dry-run", "--json",
        ])
        .unwrap();
        assert_eq!(cli.target_percentage, 12.5);
        assert!(cli.progress && cli.dry_run && cli.json);
        assert_eq!(cli.codec, Some(CodecChoice::Qsv));
    }

    #[test]
    fn test_rejects_wrong_argument_count() {
        assert!(Cli::try_parse_from(["compress", "clip.mp4"]).is_err());
        assert!(Cli::try_parse_from(["compress", "clip.mp4", "50", "extra"]).is_err());
    }

    #[test]
    fn test_rejects_bad_percentage() {
        for bad in ["fifty", "0", "-10", "NaN"] {
            assert!(
                Cli::try_parse_from(["compress", "clip.mp4", bad]).is_err(),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_rejects_unknown_codec() {
        assert!(Cli::try_parse_from(["compress", "clip.mp4", "50", "--codec", "hevc"]).is_err());
    }

    #[test]
    fn test_target_size_mb() {
        let cli = Cli::try_parse_from(["compress", "clip.mp4", "50", "--target-size-mb", "8"]).unwrap();
        assert_eq!(cli.target_size_mb, Some(8.0));
        assert_eq!(target_size_bytes(8.0), 8_388_608);
        assert_eq!(target_size_bytes(0.5), 524_288);

        for bad in ["0", "-3", "big"] {
            assert!(
                Cli::try_parse_from(["compress", "clip.mp4", "50", "--target-size-mb", bad]).is_err(),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[cfg(unix)]
    mod pipeline {
        use super::*;
        use compress_core::{locate_tools_in, CompressError};
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        /// Fake ffprobe that touches `marker` when executed.
        fn marking_ffprobe(dir: &Path, marker: &Path) {
            let script = format!("#!/bin/sh\ntouch '{}'\necho 10.0\n", marker.display());
            let path = dir.join("ffprobe");
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        #[test]
        fn test_missing_ffmpeg_stops_before_any_tool_runs() {
            let bin = TempDir::new().unwrap();
            let work = TempDir::new().unwrap();
            let marker = work.path().join("ran");
            marking_ffprobe(bin.path(), &marker);
            let video = work.path().join("clip.mp4");
            fs::write(&video, [0u8; 2_048]).unwrap();

            let tools = locate_tools_in(bin.path());
            assert!(tools.ffmpeg.is_none());

            let cli = Cli::try_parse_from([
                "compress",
                video.to_str().unwrap(),
                "50",
                "--codec",
                "software",
            ])
            .unwrap();
            let err = execute(&cli, tools).unwrap_err();

            match err.downcast_ref::<CompressError>() {
                Some(CompressError::ToolNotFound { tool }) => assert_eq!(tool, "ffmpeg"),
                other => panic!("expected missing ffmpeg, got {:?}", other),
            }
            assert!(!marker.exists(), "ffprobe must not run without ffmpeg");
            assert!(!work.path().join("compressed_clip.mp4").exists());
        }
    }
}
