//! ffmpeg backend: stream-copy fallback muxer.
//!
//! Only container-level copying is ever requested (`-c:v copy -c:a copy`);
//! the payload is never re-encoded. A subtitle input becomes a selectable
//! soft track.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{BackendKind, MuxBackend, MuxError, MuxRequest, MuxResult};
use crate::process;

const ENV_PATH: &str = "FFMPEG_PATH";
const DEFAULT_COMMAND: &str = "ffmpeg";

pub struct FfmpegBackend {
    path: String,
}

impl FfmpegBackend {
    pub fn new(path: Option<String>) -> Self {
        Self {
            path: super::resolve_executable(path, ENV_PATH, DEFAULT_COMMAND),
        }
    }

    fn is_mp4_family(output: &Path) -> bool {
        matches!(
            output
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .as_deref(),
            Some("mp4" | "mov" | "m4v")
        )
    }

    fn build_args(req: &MuxRequest) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            req.video.to_string_lossy().to_string(),
            "-i".to_string(),
            req.audio.to_string_lossy().to_string(),
        ];

        if let Some(subtitle) = &req.subtitle {
            args.extend(["-i".to_string(), subtitle.to_string_lossy().to_string()]);
        }

        args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
        ]);
        if req.subtitle.is_some() {
            args.extend(["-map".to_string(), "2:0".to_string()]);
        }

        args.extend([
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
        ]);
        if req.subtitle.is_some() {
            // MP4 cannot hold text subtitles verbatim; mov_text keeps the
            // track soft and selectable. Other containers take it as-is.
            if Self::is_mp4_family(&req.output) {
                args.extend(["-c:s".to_string(), "mov_text".to_string()]);
            } else {
                args.extend(["-c:s".to_string(), "copy".to_string()]);
            }
        }

        // Applying movflags to non-MP4 outputs makes ffmpeg reject the job.
        if Self::is_mp4_family(&req.output) {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.push(req.output.to_string_lossy().to_string());
        args
    }

    fn map_run_error(&self, err: process::RunError) -> MuxError {
        match err {
            process::RunError::Cancelled => MuxError::Cancelled,
            e if e.is_unavailable() => MuxError::Unavailable {
                backend: BackendKind::Ffmpeg,
                path: self.path.clone(),
                reason: e.to_string(),
            },
            e => MuxError::Failed {
                backend: BackendKind::Ffmpeg,
                code: None,
                detail: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl MuxBackend for FfmpegBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ffmpeg
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
        Ok(output
            .stdout
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    async fn mux(
        &self,
        req: &MuxRequest,
        cancel: &CancellationToken,
    ) -> Result<MuxResult, MuxError> {
        let start = Instant::now();

        let mut cmd = process::command(&self.path);
        cmd.args(Self::build_args(req)).env("LC_ALL", "C");

        let output = process::run(&mut cmd, cancel)
            .await
            .map_err(|e| self.map_run_error(e))?;

        if !output.status.success() {
            return Err(MuxError::Failed {
                backend: BackendKind::Ffmpeg,
                code: output.status.code(),
                detail: output.diagnostic(),
            });
        }

        super::finished_output(BackendKind::Ffmpeg, &req.output, start.elapsed().as_secs_f64())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(subtitle: Option<&str>, output: &str) -> MuxRequest {
        MuxRequest {
            video: PathBuf::from("/cache/t/video.m4s"),
            audio: PathBuf::from("/cache/t/audio.m4s"),
            subtitle: subtitle.map(PathBuf::from),
            output: PathBuf::from(output),
        }
    }

    #[test]
    fn copies_both_streams_without_reencode() {
        let args = FfmpegBackend::build_args(&request(None, "/out/title.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a copy"));
        assert!(!joined.contains("-c:s"));
        assert!(joined.contains("-map 0:v:0"));
        assert!(joined.contains("-map 1:a:0"));
        assert_eq!(args.last().unwrap(), "/out/title.mp4");
    }

    #[test]
    fn subtitle_becomes_soft_track() {
        let args = FfmpegBackend::build_args(&request(Some("/x/d.ass"), "/out/title.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-i /x/d.ass"));
        assert!(joined.contains("-map 2:0"));
        assert!(joined.contains("-c:s mov_text"));
    }

    #[test]
    fn subtitle_copied_verbatim_outside_mp4() {
        let args = FfmpegBackend::build_args(&request(Some("/x/d.ass"), "/out/title.mkv"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:s copy"));
        assert!(!joined.contains("mov_text"));
    }

    #[test]
    fn faststart_only_for_mp4_family() {
        let mp4 = FfmpegBackend::build_args(&request(None, "/out/title.mp4")).join(" ");
        assert!(mp4.contains("-movflags +faststart"));

        let mkv = FfmpegBackend::build_args(&request(None, "/out/title.mkv")).join(" ");
        assert!(!mkv.contains("-movflags"));
    }

    #[test]
    fn overwrite_flag_present() {
        let args = FfmpegBackend::build_args(&request(None, "/out/title.mp4"));
        assert_eq!(args[0], "-y");
    }
}
