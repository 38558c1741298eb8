//! MP4Box backend: the structured-container muxer, tried first.

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{BackendKind, MuxBackend, MuxError, MuxRequest, MuxResult};
use crate::process;

const ENV_PATH: &str = "MP4BOX_PATH";
const DEFAULT_COMMAND: &str = "MP4Box";

pub struct Mp4BoxBackend {
    path: String,
}

impl Mp4BoxBackend {
    pub fn new(path: Option<String>) -> Self {
        Self {
            path: super::resolve_executable(path, ENV_PATH, DEFAULT_COMMAND),
        }
    }

    fn build_args(req: &MuxRequest) -> Vec<String> {
        let mut args = vec![
            "-add".to_string(),
            req.video.to_string_lossy().to_string(),
            "-add".to_string(),
            req.audio.to_string_lossy().to_string(),
        ];
        if let Some(subtitle) = &req.subtitle {
            args.push("-add".to_string());
            args.push(subtitle.to_string_lossy().to_string());
        }
        // -new replaces any file already at the output path, which the
        // resolver has already sanctioned by the time we run.
        args.push("-new".to_string());
        args.push(req.output.to_string_lossy().to_string());
        args
    }

    fn map_run_error(&self, err: process::RunError) -> MuxError {
        match err {
            process::RunError::Cancelled => MuxError::Cancelled,
            e if e.is_unavailable() => MuxError::Unavailable {
                backend: BackendKind::Mp4box,
                path: self.path.clone(),
                reason: e.to_string(),
            },
            e => MuxError::Failed {
                backend: BackendKind::Mp4box,
                code: None,
                detail: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl MuxBackend for Mp4BoxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mp4box
    }

    fn executable(&self) -> &str {
        &self.path
    }

    async fn probe(&self, cancel: &CancellationToken) -> Result<String, MuxError> {
        let mut cmd = process::command(&self.path);
        cmd.arg("-version");
        let output = process::run(&mut cmd, cancel)
            .await
            .map_err(|e| self.map_run_error(e))?;
        // MP4Box prints its version banner to stderr.
        let banner = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Ok(banner.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn mux(
        &self,
        req: &MuxRequest,
        cancel: &CancellationToken,
    ) -> Result<MuxResult, MuxError> {
        let start = Instant::now();

        let mut cmd = process::command(&self.path);
        cmd.args(Self::build_args(req));

        let output = process::run(&mut cmd, cancel)
            .await
            .map_err(|e| self.map_run_error(e))?;

        if !output.status.success() {
            return Err(MuxError::Failed {
                backend: BackendKind::Mp4box,
                code: output.status.code(),
                detail: output.diagnostic(),
            });
        }

        super::finished_output(BackendKind::Mp4box, &req.output, start.elapsed().as_secs_f64())
            .await
    }
}
