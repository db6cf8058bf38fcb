use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::StorageError;

/// One entry of a remote folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
}

/// A place completed files can be pushed to.
///
/// `login` must succeed before any other call.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn login(&self, credential: &Credential) -> Result<(), StorageError>;

    /// Create `folder` (and its parents) unless it already exists.
    async fn ensure_folder(&self, folder: &str) -> Result<(), StorageError>;

    /// Upload `file` into `folder`, keeping its file name. Returns the remote
    /// path.
    async fn upload(&self, file: &Path, folder: &str) -> Result<String, StorageError>;

    /// Files directly inside `folder`.
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, StorageError>;
}

/// Expand `{username}` in a folder template and normalise slashes.
pub fn render_folder(template: &str, username: &str) -> String {
    template
        .replace("{username}", username)
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
