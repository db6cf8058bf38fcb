use std::path::{Path, PathBuf};
use std::sync::Arc;

use hoard_engine::{RetryAction, RetryPolicy, retry_with_backoff};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::credential::Credential;
use crate::error::StorageError;
use crate::storage::{RemoteEntry, RemoteStorage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub local: PathBuf,
    pub remote: String,
    pub bytes: u64,
}

/// Pushes completed files into one remote folder.
///
/// The first call logs in and creates the folder; later calls reuse that
/// session. Once the credentials are rejected every call fails with
/// [`StorageError::Auth`] without contacting the backend again.
pub struct Uploader {
    storage: Arc<dyn RemoteStorage>,
    folder: String,
    retry: RetryPolicy,
    token: CancellationToken,
    ready: OnceCell<()>,
    rejected: Mutex<Option<String>>,
}

impl Uploader {
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        folder: impl Into<String>,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            storage,
            folder: folder.into(),
            retry,
            token,
            ready: OnceCell::new(),
            rejected: Mutex::new(None),
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    async fn prepare(&self, credential: &Credential) -> Result<(), StorageError> {
        if let Some(reason) = self.rejected.lock().clone() {
            return Err(StorageError::auth(reason));
        }
        let result = self
            .ready
            .get_or_try_init(|| {
                let storage = self.storage.clone();
                let credential = credential.clone();
                let folder = self.folder.clone();
                async move {
                    storage.login(&credential).await?;
                    storage.ensure_folder(&folder).await
                }
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(StorageError::Auth { reason }) => {
                warn!(backend = self.storage.name(), "Remote storage rejected the credentials");
                *self.rejected.lock() = Some(reason.clone());
                Err(StorageError::auth(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Upload every file, in order, stopping at the first failure.
    pub async fn upload(
        &self,
        files: &[PathBuf],
        credential: &Credential,
    ) -> Result<Vec<UploadReceipt>, StorageError> {
        self.prepare(credential).await?;
        let mut receipts = Vec::with_capacity(files.len());
        for file in files {
            receipts.push(self.upload_one(file).await?);
        }
        Ok(receipts)
    }

    async fn upload_one(&self, file: &Path) -> Result<UploadReceipt, StorageError> {
        let bytes = tokio::fs::metadata(file).await?.len();
        let remote = retry_with_backoff(&self.retry, &self.token, |_| {
            let storage = self.storage.clone();
            let file = file.to_path_buf();
            let folder = self.folder.clone();
            async move {
                let result = storage.upload(&file, &folder).await;
                RetryAction::from_result(result, StorageError::is_retryable)
            }
        })
        .await
        .map_err(|e| e.into_inner(|| StorageError::Cancelled))?;

        info!(file = %file.display(), remote = %remote, bytes, "Uploaded");
        Ok(UploadReceipt {
            local: file.to_path_buf(),
            remote,
            bytes,
        })
    }

    /// Files currently in the remote folder.
    pub async fn list(&self, credential: &Credential) -> Result<Vec<RemoteEntry>, StorageError> {
        self.prepare(credential).await?;
        self.storage.list(&self.folder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `flaky` uploads with a transfer error.
    #[derive(Default)]
    struct FlakyStorage {
        flaky: u32,
        logins: AtomicU32,
        uploads: AtomicU32,
        reject: bool,
    }

    #[async_trait]
    impl RemoteStorage for FlakyStorage {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn login(&self, _credential: &Credential) -> Result<(), StorageError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                Err(StorageError::auth("bad password"))
            } else {
                Ok(())
            }
        }

        async fn ensure_folder(&self, _folder: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn upload(&self, file: &Path, folder: &str) -> Result<String, StorageError> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            if n < self.flaky {
                return Err(StorageError::transfer("x", "connection reset"));
            }
            let name = file.file_name().unwrap().to_string_lossy();
            Ok(format!("{folder}/{name}"))
        }

        async fn list(&self, _folder: &str) -> Result<Vec<RemoteEntry>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
        }
    }

    fn file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"content").unwrap();
        path
    }

    #[tokio::test]
    async fn transfer_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FlakyStorage {
            flaky: 2,
            ..Default::default()
        });
        let uploader = Uploader::new(storage.clone(), "tw/alice", fast_retry(), CancellationToken::new());
        let receipts = uploader
            .upload(&[file(dir.path(), "a.mp4")], &Credential::new("u", "p"))
            .await
            .unwrap();
        assert_eq!(receipts[0].remote, "tw/alice/a.mp4");
        assert_eq!(receipts[0].bytes, 7);
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn login_happens_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FlakyStorage::default());
        let uploader = Uploader::new(storage.clone(), "tw/alice", fast_retry(), CancellationToken::new());
        let cred = Credential::new("u", "p");
        uploader.upload(&[file(dir.path(), "a.mp4")], &cred).await.unwrap();
        uploader.upload(&[file(dir.path(), "b.mp4")], &cred).await.unwrap();
        assert_eq!(storage.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_credentials_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FlakyStorage {
            reject: true,
            ..Default::default()
        });
        let uploader = Uploader::new(storage.clone(), "tw/alice", fast_retry(), CancellationToken::new());
        let cred = Credential::new("u", "p");
        let files = [file(dir.path(), "a.mp4")];
        assert!(matches!(
            uploader.upload(&files, &cred).await,
            Err(StorageError::Auth { .. })
        ));
        assert!(matches!(
            uploader.upload(&files, &cred).await,
            Err(StorageError::Auth { .. })
        ));
        assert_eq!(storage.logins.load(Ordering::SeqCst), 1);
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 0);
    }
}
