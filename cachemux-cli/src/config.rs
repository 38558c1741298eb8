//! TOML config file and flag merging.
//!
//! The config file supplies defaults; command-line flags always win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cachemux::MergePolicy;
use cachemux::batch::default_concurrency;
use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::error::{AppError, Result};

const CONFIG_DIR: &str = "cachemux";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_OUT_DIR: &str = "merged";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache_root: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub mp4box: Option<String>,
    pub ffmpeg: Option<String>,
    pub danmaku: bool,
    pub danmaku_factory: Option<String>,
    pub jobs: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load from an explicit path (must exist) or the default location
    /// (absence is fine).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) if !required => return Ok(Self::default()),
            Err(e) => {
                return Err(AppError::config(format!(
                    "config file {}: {e}",
                    path.display()
                )));
            }
        };

        toml::from_str(&text)
            .map_err(|e| AppError::config(format!("config file {}: {e}", path.display())))
    }

    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }
}

/// Fully resolved run options, after merging flags over config defaults.
#[derive(Debug)]
pub struct Resolved {
    pub cache_root: PathBuf,
    pub out_dir: PathBuf,
    pub policy: MergePolicy,
    pub mp4box: Option<String>,
    pub ffmpeg: Option<String>,
    pub danmaku: bool,
    pub danmaku_factory: Option<String>,
    pub jobs: usize,
    pub timeout: Duration,
}

pub fn resolve(args: &Args, config: AppConfig) -> Resolved {
    Resolved {
        cache_root: args
            .cache_root
            .clone()
            .or(config.cache_root)
            .unwrap_or_else(|| PathBuf::from(".")),
        out_dir: args
            .out_dir
            .clone()
            .or(config.out_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
        policy: MergePolicy {
            skip: args.skip,
            overlay: args.overlay,
        },
        mp4box: args.mp4box.clone().or(config.mp4box),
        ffmpeg: args.ffmpeg.clone().or(config.ffmpeg),
        danmaku: args.danmaku || config.danmaku,
        danmaku_factory: args.danmaku_factory.clone().or(config.danmaku_factory),
        jobs: args
            .jobs
            .or(config.jobs)
            .unwrap_or_else(default_concurrency)
            .max(1),
        timeout: Duration::from_secs(
            args.timeout
                .or(config.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        ),
    }
}
