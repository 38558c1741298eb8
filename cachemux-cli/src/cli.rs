//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Sentinel executable value that triggers interactive selection.
pub const ASK_SENTINEL: &str = "ask";

#[derive(Parser, Debug)]
#[command(
    name = "cachemux",
    version,
    about = "Rebuild playable videos from the paired audio/video segments a streaming client caches",
    long_about = None
)]
pub struct Args {
    /// Cache root directory to scan.
    #[arg(value_name = "CACHE_ROOT")]
    pub cache_root: Option<PathBuf>,

    /// Directory for merged outputs (default: ./merged).
    #[arg(long, short = 'o', value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Keep existing files, skipping colliding titles.
    #[arg(long)]
    pub skip: bool,

    /// Replace existing files on name collisions (--skip wins when both are set).
    #[arg(long)]
    pub overlay: bool,

    /// MP4Box executable path, or "ask" to choose interactively.
    #[arg(long, value_name = "PATH|ask")]
    pub mp4box: Option<String>,

    /// ffmpeg executable path, or "ask" to choose interactively.
    #[arg(long, value_name = "PATH|ask")]
    pub ffmpeg: Option<String>,

    /// Convert danmaku XML and attach it as a subtitle track.
    #[arg(long)]
    pub danmaku: bool,

    /// Danmaku converter executable.
    #[arg(long, value_name = "PATH")]
    pub danmaku_factory: Option<String>,

    /// Concurrent mux processes (default: available CPUs).
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Per-invocation muxer timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Config file (default: the platform config directory).
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose logging.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Only log errors.
    #[arg(long, short = 'q')]
    pub quiet: bool,
}
