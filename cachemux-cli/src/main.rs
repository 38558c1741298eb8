mod cli;
mod config;
mod error;
mod output;

use std::process;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{Level, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cachemux::{
    BatchCoordinator, BatchOptions, DanmakuConverter, MuxerAdapter, NoSubtitles, SubtitleAttacher,
};

use crate::cli::{ASK_SENTINEL, Args};
use crate::config::{AppConfig, Resolved};
use crate::error::{AppError, Result};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("{} {e}", "Error:".red().bold());
        process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    let config = AppConfig::load(args.config.as_deref())?;
    let mut resolved = config::resolve(&args, config);
    resolve_sentinels(&mut resolved)?;

    let adapter = Arc::new(MuxerAdapter::with_default_backends(
        resolved.mp4box.clone(),
        resolved.ffmpeg.clone(),
        resolved.timeout,
    ));

    let subtitles: Arc<dyn SubtitleAttacher> = if resolved.danmaku {
        Arc::new(DanmakuConverter::new(resolved.danmaku_factory.clone()))
    } else {
        Arc::new(NoSubtitles)
    };

    let options = BatchOptions::new(&resolved.out_dir)
        .with_policy(resolved.policy)
        .with_concurrency(resolved.jobs);

    let bar = progress_bar();
    let coordinator = BatchCoordinator::new(adapter, subtitles, options).with_progress({
        let bar = bar.clone();
        Arc::new(move |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        })
    });

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping new merges");
            token.cancel();
        }
    });

    let report = coordinator.run(&resolved.cache_root, cancel).await?;
    bar.finish_and_clear();

    print!("{}", output::render(&report));
    Ok(())
}

/// Swap the `ask` sentinel for a real path chosen interactively. The engine
/// only ever sees resolved executable paths.
fn resolve_sentinels(resolved: &mut Resolved) -> Result<()> {
    if resolved.mp4box.as_deref() == Some(ASK_SENTINEL) {
        resolved.mp4box = Some(prompt_for_executable("MP4Box")?);
    }
    if resolved.ffmpeg.as_deref() == Some(ASK_SENTINEL) {
        resolved.ffmpeg = Some(prompt_for_executable("ffmpeg")?);
    }
    Ok(())
}

fn prompt_for_executable(name: &str) -> Result<String> {
    inquire::Text::new(&format!("Path to the {name} executable:"))
        .prompt()
        .map_err(|e| AppError::config(format!("backend selection for {name} aborted: {e}")))
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} titles {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}
