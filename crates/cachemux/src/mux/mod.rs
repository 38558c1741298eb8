//! Muxer adapter: one invocation contract over two external backends.
//!
//! MP4Box is preferred (it matches the muxing the source platform performs
//! itself, avoiding A/V sync drift); ffmpeg in stream-copy mode is the
//! fallback. Fallback is an explicit ordered list tried in sequence, and
//! every attempt is bounded by a timeout.

mod ffmpeg;
mod mp4box;

pub use ffmpeg::FfmpegBackend;
pub use mp4box::Mp4BoxBackend;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which external muxer executable a result or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Structured container muxer (GPAC MP4Box).
    Mp4box,
    /// General-purpose muxer, restricted to stream copy.
    Ffmpeg,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4box => "MP4Box",
            Self::Ffmpeg => "ffmpeg",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from one backend invocation.
#[derive(Error, Debug)]
pub enum MuxError {
    /// The executable is missing or not runnable. Fatal for this backend;
    /// the adapter moves on to the next one.
    #[error("{backend} is not usable ({path}): {reason}")]
    Unavailable {
        backend: BackendKind,
        path: String,
        reason: String,
    },

    /// The process ran and exited with a failure status.
    #[error("{backend} exited with status {code:?}: {detail}")]
    Failed {
        backend: BackendKind,
        code: Option<i32>,
        detail: String,
    },

    /// The process exceeded the bounded wait and was killed.
    #[error("{backend} timed out after {secs}s")]
    Timeout { backend: BackendKind, secs: u64 },

    #[error("mux cancelled")]
    Cancelled,
}

/// Inputs for one mux invocation.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub subtitle: Option<PathBuf>,
    pub output: PathBuf,
}

/// Outcome of one successful mux invocation.
#[derive(Debug, Clone)]
pub struct MuxResult {
    pub backend: BackendKind,
    pub output: PathBuf,
    pub size_bytes: u64,
    pub elapsed_secs: f64,
}

/// One external muxer executable behind the uniform invocation contract.
#[async_trait]
pub trait MuxBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The executable this backend would invoke.
    fn executable(&self) -> &str;

    /// Cheap availability check (runs the version command).
    async fn probe(&self, cancel: &CancellationToken) -> Result<String, MuxError>;

    /// Run one mux. Implementations stream-copy only; no re-encode.
    async fn mux(&self, req: &MuxRequest, cancel: &CancellationToken)
    -> Result<MuxResult, MuxError>;
}

/// Bound on backend probes; a muxer that cannot print its version promptly
/// is not usable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Ordered backends behind one `mux` call with timeout and fallback.
pub struct MuxerAdapter {
    backends: Vec<Arc<dyn MuxBackend>>,
    timeout: Duration,
}

impl MuxerAdapter {
    /// Build an adapter over an explicit backend order.
    pub fn new(backends: Vec<Arc<dyn MuxBackend>>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    /// The standard pair: MP4Box first, ffmpeg as fallback. `None` paths
    /// fall back to env vars and then the bare command names.
    pub fn with_default_backends(
        mp4box_path: Option<String>,
        ffmpeg_path: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self::new(
            vec![
                Arc::new(Mp4BoxBackend::new(mp4box_path)),
                Arc::new(FfmpegBackend::new(ffmpeg_path)),
            ],
            timeout,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe every backend, returning the usable ones with their version
    /// strings. An empty result is a configuration error for the caller.
    pub async fn preflight(&self, cancel: &CancellationToken) -> Vec<(BackendKind, String)> {
        let mut usable = Vec::new();
        for backend in &self.backends {
            let probe = tokio::time::timeout(PROBE_TIMEOUT, backend.probe(cancel)).await;
            match probe {
                Ok(Ok(version)) => {
                    info!("{} available: {}", backend.kind(), version);
                    usable.push((backend.kind(), version));
                }
                Ok(Err(e)) => warn!("{} unavailable: {}", backend.kind(), e),
                Err(_) => warn!("{} probe timed out", backend.kind()),
            }
        }
        usable
    }

    /// Try each backend in order until one produces the output.
    ///
    /// Any failure (unavailable executable, non-zero exit, timeout) moves on
    /// to the next backend; the last error is returned once the list is
    /// exhausted.
    pub async fn mux(
        &self,
        req: &MuxRequest,
        cancel: &CancellationToken,
    ) -> Result<MuxResult, MuxError> {
        let mut last_error = None;

        for backend in &self.backends {
            if cancel.is_cancelled() {
                return Err(MuxError::Cancelled);
            }

            match tokio::time::timeout(self.timeout, backend.mux(req, cancel)).await {
                Ok(Ok(result)) => {
                    info!(
                        "{} muxed {} in {:.2}s",
                        result.backend,
                        result.output.display(),
                        result.elapsed_secs
                    );
                    return Ok(result);
                }
                Ok(Err(MuxError::Cancelled)) => return Err(MuxError::Cancelled),
                Ok(Err(e)) => {
                    warn!("{} failed, trying next backend: {}", backend.kind(), e);
                    last_error = Some(e);
                }
                Err(_) => {
                    // The dropped future reaps the child (kill-on-drop).
                    let e = MuxError::Timeout {
                        backend: backend.kind(),
                        secs: self.timeout.as_secs(),
                    };
                    warn!("{e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(MuxError::Unavailable {
            backend: BackendKind::Mp4box,
            path: String::new(),
            reason: "no backends configured".to_string(),
        }))
    }
}

/// Resolve a backend executable: explicit path, then env var, then the bare
/// command name on PATH.
pub(crate) fn resolve_executable(
    explicit: Option<String>,
    env_var: &str,
    default: &str,
) -> String {
    explicit
        .filter(|p| !p.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|p| !p.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

/// Verify a backend actually produced its output file.
pub(crate) async fn finished_output(
    backend: BackendKind,
    output: &std::path::Path,
    elapsed_secs: f64,
) -> Result<MuxResult, MuxError> {
    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.is_file() => Ok(MuxResult {
            backend,
            output: output.to_path_buf(),
            size_bytes: meta.len(),
            elapsed_secs,
        }),
        _ => Err(MuxError::Failed {
            backend,
            code: None,
            detail: format!(
                "reported success but produced no output at {}",
                output.display()
            ),
        }),
    }
}
