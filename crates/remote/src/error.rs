use process_utils::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Credentials were rejected. Never retried.
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    #[error("transfer of `{name}` failed: {reason}")]
    Transfer { name: String, reason: String },

    /// The storage backend cannot be used at all (e.g. missing binary).
    #[error("storage backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("not logged in")]
    NotLoggedIn,

    #[error("unexpected response from storage backend: {reason}")]
    Protocol { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    pub fn transfer(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transfer {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Interrupted transfers may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::Io(_))
    }
}

impl From<ProcessError> for StorageError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Cancelled { .. } => Self::Cancelled,
            e @ ProcessError::Spawn { .. } => Self::unavailable(e.to_string()),
            ProcessError::Io { source, .. } => Self::Io(source),
        }
    }
}
