//! Storage in a local directory, for dry runs and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::credential::Credential;
use crate::error::StorageError;
use crate::storage::{RemoteEntry, RemoteStorage};

pub struct LocalDirStorage {
    root: PathBuf,
    /// When set, only this credential is accepted.
    expected: Option<Credential>,
    logged_in: Mutex<bool>,
}

impl LocalDirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            expected: None,
            logged_in: Mutex::new(false),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.expected = Some(credential);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, folder: &str) -> PathBuf {
        folder
            .split('/')
            .filter(|p| !p.is_empty() && *p != "." && *p != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    fn check_login(&self) -> Result<(), StorageError> {
        if *self.logged_in.lock() {
            Ok(())
        } else {
            Err(StorageError::NotLoggedIn)
        }
    }
}

#[async_trait]
impl RemoteStorage for LocalDirStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn login(&self, credential: &Credential) -> Result<(), StorageError> {
        if !credential.is_complete() {
            return Err(StorageError::auth("user or password is empty"));
        }
        if let Some(expected) = &self.expected
            && expected != credential
        {
            return Err(StorageError::auth(format!(
                "credentials for {} were rejected",
                credential.user()
            )));
        }
        *self.logged_in.lock() = true;
        Ok(())
    }

    async fn ensure_folder(&self, folder: &str) -> Result<(), StorageError> {
        self.check_login()?;
        tokio::fs::create_dir_all(self.folder_path(folder)).await?;
        Ok(())
    }

    async fn upload(&self, file: &Path, folder: &str) -> Result<String, StorageError> {
        self.check_login()?;
        let name = file
            .file_name()
            .ok_or_else(|| StorageError::transfer(file.display().to_string(), "not a file path"))?;
        let target = self.folder_path(folder).join(name);
        let name = name.to_string_lossy().into_owned();
        tokio::fs::copy(file, &target)
            .await
            .map_err(|e| StorageError::transfer(&name, e.to_string()))?;
        debug!(from = %file.display(), to = %target.display(), "Copied file");
        Ok(format!("{}/{}", folder.trim_end_matches('/'), name))
    }

    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        self.check_login()?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.folder_path(folder)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                entries.push(RemoteEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_unexpected_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDirStorage::new(dir.path())
            .with_credential(Credential::new("user@example.com", "hunter2"));
        let err = storage
            .login(&Credential::new("user@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Auth { .. }));
        assert!(matches!(
            storage.ensure_folder("tw/alice").await,
            Err(StorageError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn folder_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDirStorage::new(dir.path().join("remote"));
        assert_eq!(
            storage.folder_path("../../etc"),
            dir.path().join("remote").join("etc")
        );
    }
}
