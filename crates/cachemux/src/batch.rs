//! Batch coordinator: drives cache root → batch report.
//!
//! Titles are independent units of work on a bounded pool (semaphore +
//! join set). A title's failure is folded into the report and never stops
//! the batch; only configuration problems (missing cache root, no usable
//! backend) abort the run. Outcomes are reassembled in scan order so the
//! report is deterministic regardless of task interleaving.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dedup::{classify, file_sha256, input_pair_key};
use crate::ledger::{MergeLedger, MergeRecord};
use crate::mux::{MuxError, MuxRequest, MuxerAdapter};
use crate::report::{BatchReport, MergeFailure, MergeSkip, MergeSuccess, SkipReason};
use crate::resolver::{Decision, MergePolicy, decide, next_free_path};
use crate::scanner::{self, CacheEntry};
use crate::subtitle::SubtitleAttacher;
use crate::{Error, Result};

/// Container extension for merged outputs.
const OUTPUT_EXT: &str = "mp4";

/// Callback invoked after each finished title with (done, total).
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Options for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub policy: MergePolicy,
    /// Concurrent mux invocations; muxing is process-bound, so this defaults
    /// to the available processing units.
    pub concurrency: usize,
}

impl BatchOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            policy: MergePolicy::default(),
            concurrency: default_concurrency(),
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

enum TitleOutcome {
    Merged(MergeSuccess),
    Skipped(MergeSkip),
    Failed(MergeFailure),
    Cancelled,
}

pub struct BatchCoordinator {
    adapter: Arc<MuxerAdapter>,
    subtitles: Arc<dyn SubtitleAttacher>,
    options: BatchOptions,
    progress: Option<Arc<ProgressFn>>,
}

impl BatchCoordinator {
    pub fn new(
        adapter: Arc<MuxerAdapter>,
        subtitles: Arc<dyn SubtitleAttacher>,
        options: BatchOptions,
    ) -> Self {
        Self {
            adapter,
            subtitles,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the full pipeline.
    ///
    /// Returns `Err` only for configuration problems; every per-title error
    /// lands in the report. Cancellation stops spawning, terminates in-flight
    /// muxers, and still yields a best-effort report.
    pub async fn run(&self, cache_root: &Path, cancel: CancellationToken) -> Result<BatchReport> {
        let started = Instant::now();

        let usable = self.adapter.preflight(&cancel).await;
        if usable.is_empty() {
            return Err(Error::config(
                "no usable muxer backend (checked MP4Box and ffmpeg)",
            ));
        }

        let scan = scanner::scan(cache_root).await?;
        info!(
            "Scan found {} mergeable title(s), {} skipped folder(s)",
            scan.entries.len(),
            scan.skipped.len()
        );

        tokio::fs::create_dir_all(&self.options.output_dir)
            .await
            .map_err(|e| {
                Error::config(format!(
                    "output directory {}: {e}",
                    self.options.output_dir.display()
                ))
            })?;

        let ledger = Arc::new(Mutex::new(MergeLedger::load(&self.options.output_dir).await));

        let total = scan.entries.len();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks: JoinSet<(usize, TitleOutcome)> = JoinSet::new();
        let mut cancelled = 0usize;

        for (idx, entry) in scan.entries.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled += total - idx;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let adapter = self.adapter.clone();
            let subtitles = self.subtitles.clone();
            let ledger = ledger.clone();
            let policy = self.options.policy;
            let output_dir = self.options.output_dir.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let outcome =
                    merge_title(entry, adapter, subtitles, ledger, policy, output_dir, cancel)
                        .await;
                drop(permit);
                (idx, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(indexed) => {
                    outcomes.push(indexed);
                    if let Some(progress) = &self.progress {
                        progress(outcomes.len(), total);
                    }
                }
                Err(e) => warn!("Merge task aborted: {e}"),
            }
        }
        outcomes.sort_by_key(|(idx, _)| *idx);

        let mut report = BatchReport {
            cancelled,
            ..Default::default()
        };

        // Discovery failures come first; they were known before any task ran.
        for skip in scan.skipped {
            let title = skip
                .dir
                .strip_prefix(cache_root)
                .ok()
                .and_then(|rel| rel.components().next())
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .unwrap_or_else(|| skip.dir.display().to_string());
            report.failures.push(MergeFailure {
                title,
                dir: skip.dir,
                reason: skip.reason,
            });
        }

        for (_, outcome) in outcomes {
            match outcome {
                TitleOutcome::Merged(success) => report.successes.push(success),
                TitleOutcome::Skipped(skip) => report.skipped.push(skip),
                TitleOutcome::Failed(failure) => report.failures.push(failure),
                TitleOutcome::Cancelled => report.cancelled += 1,
            }
        }

        let snapshot = ledger.lock().clone();
        if !snapshot.is_empty()
            && let Err(e) = snapshot.save(&self.options.output_dir).await
        {
            warn!("Failed to persist merge ledger: {e}");
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        Ok(report)
    }
}

async fn merge_title(
    entry: CacheEntry,
    adapter: Arc<MuxerAdapter>,
    subtitles: Arc<dyn SubtitleAttacher>,
    ledger: Arc<Mutex<MergeLedger>>,
    policy: MergePolicy,
    output_dir: PathBuf,
    cancel: CancellationToken,
) -> TitleOutcome {
    let title = entry.title.clone();
    let dir = entry.dir.clone();

    match try_merge_title(entry, adapter, subtitles, ledger, policy, output_dir, cancel).await {
        Ok(outcome) => outcome,
        Err(Error::Mux(MuxError::Cancelled)) => TitleOutcome::Cancelled,
        Err(e) => {
            warn!("Merge failed for '{title}': {e}");
            TitleOutcome::Failed(MergeFailure {
                title,
                dir,
                reason: e.to_string(),
            })
        }
    }
}

async fn try_merge_title(
    entry: CacheEntry,
    adapter: Arc<MuxerAdapter>,
    subtitles: Arc<dyn SubtitleAttacher>,
    ledger: Arc<Mutex<MergeLedger>>,
    policy: MergePolicy,
    output_dir: PathBuf,
    cancel: CancellationToken,
) -> Result<TitleOutcome> {
    let candidate = output_dir.join(format!("{}.{OUTPUT_EXT}", entry.title));

    let input_key = input_pair_key(&entry.video, &entry.audio).await?;
    let record = ledger.lock().find(&input_key).cloned();
    let verdict = classify(&output_dir, record.as_ref()).await?;
    let exists = tokio::fs::try_exists(&candidate).await?;

    let output = match decide(exists, verdict, policy) {
        Decision::AbortDuplicate => {
            let recorded = record
                .map(|r| output_dir.join(r.output_name))
                .unwrap_or_else(|| candidate.clone());
            info!("'{}' already merged at {}", entry.title, recorded.display());
            return Ok(TitleOutcome::Skipped(MergeSkip {
                title: entry.title,
                output: recorded,
                reason: SkipReason::AlreadyMerged,
            }));
        }
        Decision::Skip => {
            info!(
                "'{}' skipped, keeping existing {}",
                entry.title,
                candidate.display()
            );
            return Ok(TitleOutcome::Skipped(MergeSkip {
                title: entry.title,
                output: candidate,
                reason: SkipReason::ExistingKept,
            }));
        }
        Decision::Fresh | Decision::Overwrite => candidate,
        Decision::Rename => {
            let renamed = next_free_path(&candidate).await?;
            info!(
                "'{}' collides with an existing file, writing {}",
                entry.title,
                renamed.display()
            );
            renamed
        }
    };

    let subtitle = match subtitles.prepare(&entry, &cancel).await {
        Ok(subtitle) => subtitle,
        Err(e) => {
            warn!("Subtitle preparation failed for '{}': {e}", entry.title);
            None
        }
    };

    if cancel.is_cancelled() {
        return Ok(TitleOutcome::Cancelled);
    }

    let request = MuxRequest {
        video: entry.video,
        audio: entry.audio,
        subtitle,
        output,
    };
    let result = adapter.mux(&request, &cancel).await?;

    let output_sha256 = file_sha256(&result.output).await?;
    ledger
        .lock()
        .insert(MergeRecord::from_result(input_key, &result, output_sha256));

    Ok(TitleOutcome::Merged(MergeSuccess {
        title: entry.title,
        output: result.output.clone(),
        backend: result.backend,
        size_bytes: result.size_bytes,
        elapsed_secs: result.elapsed_secs,
    }))
}
