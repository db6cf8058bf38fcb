//! Storage backed by the `rclone` binary.
//!
//! No rclone config file is needed: paths use an on-the-fly remote such as
//! `:mega:tw/alice`, and the account is handed to rclone through its
//! `RCLONE_<BACKEND>_USER`/`RCLONE_<BACKEND>_PASS` environment variables so
//! that secrets never show up in the process list.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use process_utils::{CommandOutput, run_with_cancel, tokio_command};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::credential::Credential;
use crate::error::StorageError;
use crate::storage::{RemoteEntry, RemoteStorage};

pub const DEFAULT_BACKEND: &str = "mega";

/// stderr fragments rclone prints when an account is rejected.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "couldn't login",
    "login failed",
    "object (typically, node or user) not found",
    "invalid credentials",
    "incorrect password",
    "authentication",
];

#[derive(Clone)]
struct Session {
    user: String,
    obscured_password: String,
}

pub struct RcloneStorage {
    rclone_path: PathBuf,
    backend: String,
    session: Mutex<Option<Session>>,
    token: CancellationToken,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsJsonEntry {
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    is_dir: bool,
}

impl RcloneStorage {
    pub fn new(rclone_path: impl Into<PathBuf>, token: CancellationToken) -> Self {
        Self {
            rclone_path: rclone_path.into(),
            backend: DEFAULT_BACKEND.to_string(),
            session: Mutex::new(None),
            token,
        }
    }

    /// Use another rclone backend that takes `user`/`pass` options.
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// `:mega:<path>`
    pub fn remote_path(&self, path: &str) -> String {
        format!(":{}:{}", self.backend, path.trim_start_matches('/'))
    }

    fn env_prefix(&self) -> String {
        format!("RCLONE_{}", self.backend.to_ascii_uppercase())
    }

    fn session(&self) -> Result<Session, StorageError> {
        self.session.lock().clone().ok_or(StorageError::NotLoggedIn)
    }

    async fn run(&self, session: &Session, args: &[&str]) -> Result<CommandOutput, StorageError> {
        let prefix = self.env_prefix();
        let mut cmd = tokio_command(&self.rclone_path);
        cmd.args(["--log-level", "ERROR"])
            .args(args)
            .env(format!("{prefix}_USER"), &session.user)
            .env(format!("{prefix}_PASS"), &session.obscured_password);
        debug!(rclone = %self.rclone_path.display(), ?args, "Running rclone");
        Ok(run_with_cancel(cmd, None, &self.token).await?)
    }

    /// Obscure the password the way rclone expects it in its environment,
    /// reading it from stdin.
    async fn obscure(&self, password: &str) -> Result<String, StorageError> {
        let mut cmd = tokio_command(&self.rclone_path);
        cmd.args(["obscure", "-"]);
        let output = run_with_cancel(cmd, Some(format!("{password}\n").into_bytes()), &self.token).await?;
        if !output.success() {
            return Err(StorageError::unavailable(format!(
                "rclone obscure failed: {}",
                output.last_error_line().unwrap_or("no error output")
            )));
        }
        let obscured = output.stdout.trim();
        if obscured.is_empty() {
            return Err(StorageError::Protocol {
                reason: "rclone obscure printed nothing".to_string(),
            });
        }
        Ok(obscured.to_string())
    }
}

/// Whether rclone's error output describes rejected credentials.
pub fn is_auth_failure(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m))
}

fn failure_reason(output: &CommandOutput) -> String {
    format!(
        "rclone exited with code {}: {}",
        output.code(),
        output.last_error_line().unwrap_or("no error output")
    )
}

#[async_trait]
impl RemoteStorage for RcloneStorage {
    fn name(&self) -> &'static str {
        "rclone"
    }

    async fn login(&self, credential: &Credential) -> Result<(), StorageError> {
        if !credential.is_complete() {
            return Err(StorageError::auth("user or password is empty"));
        }
        let session = Session {
            user: credential.user().to_string(),
            obscured_password: self.obscure(credential.expose_password()).await?,
        };

        let root = self.remote_path("");
        let output = self.run(&session, &["lsd", &root]).await?;
        if !output.success() {
            let reason = failure_reason(&output);
            return Err(if is_auth_failure(&output.stderr) {
                StorageError::auth(reason)
            } else {
                StorageError::unavailable(reason)
            });
        }

        info!(backend = %self.backend, user = %credential.user(), "Logged in to remote storage");
        *self.session.lock() = Some(session);
        Ok(())
    }

    async fn ensure_folder(&self, folder: &str) -> Result<(), StorageError> {
        let session = self.session()?;
        let remote = self.remote_path(folder);
        let output = self.run(&session, &["mkdir", &remote]).await?;
        if !output.success() {
            let reason = failure_reason(&output);
            return Err(if is_auth_failure(&output.stderr) {
                StorageError::auth(reason)
            } else {
                StorageError::transfer(folder, reason)
            });
        }
        debug!(folder, "Remote folder ready");
        Ok(())
    }

    async fn upload(&self, file: &Path, folder: &str) -> Result<String, StorageError> {
        let session = self.session()?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::transfer(file.display().to_string(), "not a file path"))?;
        let remote_file = format!("{}/{}", folder.trim_end_matches('/'), name);
        let target = self.remote_path(&remote_file);
        let local = file.to_string_lossy();

        let output = self.run(&session, &["copyto", &local, &target]).await?;
        if !output.success() {
            let reason = failure_reason(&output);
            return Err(if is_auth_failure(&output.stderr) {
                StorageError::auth(reason)
            } else {
                StorageError::transfer(name, reason)
            });
        }
        Ok(remote_file)
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        let session = self.session()?;
        let remote = self.remote_path(folder);
        let output = self.run(&session, &["lsjson", &remote]).await?;
        if !output.success() {
            return Err(StorageError::transfer(folder, failure_reason(&output)));
        }
        let entries: Vec<LsJsonEntry> =
            serde_json::from_str(&output.stdout).map_err(|e| StorageError::Protocol {
                reason: format!("invalid lsjson output: {e}"),
            })?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| RemoteEntry {
                name: e.name,
                size: e.size.max(0) as u64,
            })
            .collect())
    }
}
