//! Per-run outcome: one entry per media item and the resulting exit code.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hoard_engine::DownloadError;
use hoard_remote::StorageError;
use hoard_sources::{MediaItem, MediaKind, MediaStatus, SourceError};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Process exit codes.
pub mod exit {
    /// No items, or at least one item archived.
    pub const SUCCESS: u8 = 0;
    /// Items existed and none was archived.
    pub const ALL_FAILED: u8 = 1;
    /// The run could not start or the account could not be resolved.
    pub const FATAL: u8 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Unreachable,
    Unsupported,
    PartialDownload,
    AuthError,
    TransferError,
    Cancelled,
    Internal,
}

impl From<&DownloadError> for FailureKind {
    fn from(err: &DownloadError) -> Self {
        if err.is_cancelled() {
            return Self::Cancelled;
        }
        match err {
            DownloadError::Cancelled => Self::Cancelled,
            DownloadError::PartialDownload { .. } | DownloadError::Truncated { .. } => {
                Self::PartialDownload
            }
            DownloadError::InvalidUrl { .. }
            | DownloadError::UnsupportedProtocol { .. }
            | DownloadError::Unsupported { .. }
            | DownloadError::Playlist { .. }
            | DownloadError::Decryption { .. } => Self::Unsupported,
            DownloadError::Unreachable { .. }
            | DownloadError::Network { .. }
            | DownloadError::HttpStatus { .. } => Self::Unreachable,
            DownloadError::ProxyConfiguration { .. }
            | DownloadError::Io { .. }
            | DownloadError::Mux { .. }
            | DownloadError::Process(_)
            | DownloadError::Internal { .. } => Self::Internal,
        }
    }
}

impl From<&StorageError> for FailureKind {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::Auth { .. } | StorageError::NotLoggedIn => Self::AuthError,
            StorageError::Cancelled => Self::Cancelled,
            _ => Self::TransferError,
        }
    }
}

impl From<&SourceError> for FailureKind {
    fn from(err: &SourceError) -> Self {
        match err {
            SourceError::InvalidUsername(_) | SourceError::NotFound { .. } => Self::NotFound,
            SourceError::Unreachable { .. } | SourceError::Http(_) => Self::Unreachable,
            SourceError::InvalidUrl(_) => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "run cancelled before the item finished")
    }
}

impl From<&DownloadError> for Failure {
    fn from(err: &DownloadError) -> Self {
        Self::new(err.into(), err.to_string())
    }
}

impl From<&StorageError> for Failure {
    fn from(err: &StorageError) -> Self {
        Self::new(err.into(), err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub kind: MediaKind,
    pub url: String,
    pub status: MediaStatus,
    pub attempts: u32,
    pub path: Option<PathBuf>,
    pub bytes: Option<u64>,
    /// The file was already present and not downloaded again.
    pub skipped: bool,
    /// Remote path, once uploaded.
    pub remote: Option<String>,
    pub failure: Option<Failure>,
}

impl ItemReport {
    pub fn new(item: &MediaItem) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            url: item.url.clone(),
            status: item.status(),
            attempts: item.attempts(),
            path: None,
            bytes: None,
            skipped: false,
            remote: None,
            failure: None,
        }
    }

    /// Refresh status fields from the item.
    pub fn sync(&mut self, item: &MediaItem) {
        self.status = item.status();
        self.attempts = item.attempts();
    }

    /// Downloaded (or already present) and, when uploading, uploaded.
    pub fn succeeded(&self) -> bool {
        self.status == MediaStatus::Done && self.failure.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemReport>,
    /// Names found in the remote folder after uploading.
    pub remote_listing: Option<Vec<String>>,
    /// Error that aborted the run before items were processed.
    pub fatal: Option<Failure>,
}

impl RunReport {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            started_at: Utc::now(),
            finished_at: None,
            items: Vec::new(),
            remote_listing: None,
            fatal: None,
        }
    }

    pub fn fatal(username: impl Into<String>, failure: Failure) -> Self {
        let mut report = Self::new(username);
        report.fatal = Some(failure);
        report.finish();
        report
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn skipped(&self) -> usize {
        self.items.iter().filter(|i| i.skipped).count()
    }

    pub fn exit_code(&self) -> u8 {
        if self.fatal.is_some() {
            exit::FATAL
        } else if self.items.is_empty() || self.succeeded() > 0 {
            exit::SUCCESS
        } else {
            exit::ALL_FAILED
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| AppError::Report(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).map_err(|e| AppError::Report(e.to_string()))
    }
}
