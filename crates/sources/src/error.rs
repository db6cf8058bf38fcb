use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid username `{0}`")]
    InvalidUsername(String),

    #[error("account `{username}` not found: {reason}")]
    NotFound { username: String, reason: String },

    #[error("source unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl SourceError {
    pub fn not_found(username: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound {
            username: username.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable {
            reason: reason.into(),
        }
    }
}
