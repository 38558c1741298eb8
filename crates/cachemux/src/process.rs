//! Child-process plumbing shared by the muxer backends and the subtitle
//! converter.
//!
//! Output streams are drained concurrently while waiting, so a chatty tool
//! can never fill a pipe and deadlock. Children are spawned kill-on-drop:
//! cancelling or timing out the surrounding future reaps the process.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Instant;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Failures while running a child process, before its exit status is known.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to wait for '{program}': {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

impl RunError {
    /// True when the program could not be started at all (missing or not
    /// executable), as opposed to starting and then misbehaving.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Spawn { source, .. } if matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            )
        )
    }
}

/// Captured outcome of one child process run.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_secs: f64,
}

impl CommandOutput {
    /// A short diagnostic suitable for a failure report: the last few lines
    /// of stderr, falling back to stdout.
    pub fn diagnostic(&self) -> String {
        output_tail(&self.stdout, &self.stderr)
    }
}

fn output_tail(stdout: &str, stderr: &str) -> String {
    let pick = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    let lines: Vec<&str> = pick.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines.len().saturating_sub(8);
    lines[tail..].join("\n")
}

/// Build a command with stdio piped and kill-on-drop set.
///
/// On Windows the `CREATE_NO_WINDOW` flag keeps muxer invocations from
/// flashing console windows.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

fn drain_lines(stream: impl AsyncRead + Unpin + Send + 'static) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut collected = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("child: {line}");
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

/// Run a command to completion, capturing stdout/stderr.
///
/// Returns `RunError::Cancelled` (after killing the child) when the token
/// fires first. Bounding the wait with a timeout is the caller's concern;
/// the adapter wraps every invocation in one.
pub async fn run(cmd: &mut Command, cancel: &CancellationToken) -> Result<CommandOutput, RunError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = child.stdout.take().map(drain_lines);
    let stderr = child.stderr.take().map(drain_lines);

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(RunError::Cancelled);
        }
        status = child.wait() => status.map_err(|source| RunError::Wait {
            program: program.clone(),
            source,
        })?,
    };

    let stdout = match stdout {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_status() {
        let mut cmd = command("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let output = run(&mut cmd, &CancellationToken::new()).await.unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_nonzero_exit() {
        let mut cmd = command("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        let output = run(&mut cmd, &CancellationToken::new()).await.unwrap();
        assert!(!output.status.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.diagnostic(), "boom");
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let mut cmd = command("definitely-not-a-real-muxer-binary");
        let err = run(&mut cmd, &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cancel = CancellationToken::new();
        let mut cmd = command("sh");
        cmd.args(["-c", "sleep 30"]);

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let start = Instant::now();
        let err = run(&mut cmd, &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn diagnostic_prefers_stderr_tail() {
        let stderr: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let diag = output_tail("ignored", &stderr);
        assert!(diag.starts_with("line 13"));
        assert!(diag.ends_with("line 20"));
        assert_eq!(output_tail("from stdout", ""), "from stdout");
    }
}
