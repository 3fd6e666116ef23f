//! Bounded command execution: the part of the capability surface tools use
//! to run processes inside the sandbox boundary.

use crate::boundary::{Boundary, BoundaryViolation};
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    BoundaryViolation(#[from] BoundaryViolation),

    #[error("failed to spawn command: {0}")]
    SpawnFailed(String),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("failed to signal process {pid}: {source}")]
    SignalFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a completed foreground command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub process_id: Option<u32>,
}

/// Handle to a still-running background command. Output accumulates on
/// `output_rx` as it's produced rather than being buffered until exit.
pub struct BackgroundHandle {
    pub process_id: u32,
    pub output_rx: mpsc::UnboundedReceiver<OutputLine>,
    child: tokio::process::Child,
}

impl BackgroundHandle {
    /// Best-effort poll of whether the process has exited, without blocking.
    pub async fn try_exit_code(&mut self) -> Option<i32> {
        self.child.try_wait().ok().flatten().map(|status| status.code().unwrap_or(-1))
    }
}

#[derive(Debug, Clone)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Runs commands bounded by a [`Boundary`]. Opaque to callers: whether the
/// process runs directly on this host or inside some other isolation layer
/// is this type's business alone.
pub struct CommandRunner {
    boundary: Boundary,
}

impl CommandRunner {
    pub fn new(boundary: Boundary) -> Self {
        Self { boundary }
    }

    /// Runs `program` to completion and collects its full output. The
    /// working directory is checked against the boundary before spawn; no
    /// process is started for a rejected path.
    pub async fn run_foreground(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandOutcome, ExecError> {
        let checked_cwd = self.boundary.check(cwd)?;

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&checked_cwd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            process_id: None,
        })
    }

    /// Spawns `program` and returns immediately with a handle; stdout/stderr
    /// are streamed line-by-line on `BackgroundHandle::output_rx` as the
    /// process produces them, rather than buffered until exit.
    pub fn run_background(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<BackgroundHandle, ExecError> {
        let checked_cwd = self.boundary.check(cwd)?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&checked_cwd)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

        let process_id = child
            .id()
            .ok_or_else(|| ExecError::SpawnFailed("child exited before pid was available".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(OutputLine::Stdout(line)).is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(OutputLine::Stderr(line)).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(BackgroundHandle {
            process_id,
            output_rx: rx,
            child,
        })
    }

    /// Sends `SIGKILL` (Unix) to a background process by pid. Returns
    /// `ProcessNotFound` if the signal cannot be delivered because the
    /// process is already gone.
    pub fn kill(&self, pid: u32) -> Result<(), ExecError> {
        #[cfg(unix)]
        {
            let result = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
            if result != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::NotFound {
                    return Err(ExecError::ProcessNotFound { pid });
                }
                return Err(ExecError::SignalFailed { pid, source: err });
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            Err(ExecError::SignalFailed {
                pid,
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "process kill is only implemented on unix",
                ),
            })
        }
    }

    /// Whether a process with this pid currently exists, for tool-facing
    /// process inspection.
    pub fn is_alive(&self, pid: u32) -> bool {
        #[cfg(unix)]
        {
            unsafe { libc::kill(pid as i32, 0) == 0 }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            false
        }
    }
}
