//! Child-process helpers shared across the workspace.
//!
//! Both the muxer (`ffmpeg`) and the remote storage backend (`rclone`) drive
//! external binaries. This crate gives them one way to spawn a command, feed
//! it stdin, collect its output and kill it when the run is cancelled.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` was cancelled")]
    Cancelled { program: String },

    #[error("I/O error while talking to `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// `true` when the binary itself could not be found on `PATH`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, `-1` when the process was terminated by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Last non-empty stderr line, handy for error messages.
    pub fn last_error_line(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Run `cmd` to completion, optionally writing `stdin` to it first.
///
/// stdout and stderr are captured in full. If `token` is cancelled before the
/// process exits, the child is killed and [`ProcessError::Cancelled`] is
/// returned.
pub async fn run_with_cancel(
    mut cmd: tokio::process::Command,
    stdin: Option<Vec<u8>>,
    token: &CancellationToken,
) -> Result<CommandOutput, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(program = %program, pid = ?child.id(), "Spawned child process");

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(&input)
            .await
            .map_err(|source| ProcessError::Io {
                program: program.clone(),
                source,
            })?;
        // Dropping the pipe closes the child's stdin.
        drop(pipe);
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let collected = async {
        let (stdout, stderr, status) = tokio::join!(read_stdout, read_stderr, child.wait());
        Ok::<_, std::io::Error>((stdout?, stderr?, status?))
    };

    let result = tokio::select! {
        _ = token.cancelled() => None,
        result = collected => Some(result),
    };

    match result {
        Some(Ok((stdout, stderr, status))) => {
            let output = CommandOutput {
                status,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            };
            if !output.success() {
                warn!(program = %program, code = output.code(), "Process exited with failure");
            }
            trace!(program = %program, stderr = %output.stderr, "Process finished");
            Ok(output)
        }
        Some(Err(source)) => Err(ProcessError::Io { program, source }),
        None => {
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill cancelled process");
            }
            Err(ProcessError::Cancelled { program })
        }
    }
}
