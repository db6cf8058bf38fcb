use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source error: {0}")]
    Source(#[from] hoard_sources::SourceError),

    #[error("Download error: {0}")]
    Download(#[from] hoard_engine::DownloadError),

    #[error("Storage error: {0}")]
    Storage(#[from] hoard_remote::StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("Invalid credentials file {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },

    #[error("Failed to write report: {0}")]
    Report(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
