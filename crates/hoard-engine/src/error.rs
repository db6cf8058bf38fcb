use process_utils::ProcessError;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("protocol `{protocol}` is not allowed")]
    UnsupportedProtocol { protocol: String },

    #[error("unsupported media at {url}: {reason}")]
    Unsupported { url: String, reason: String },

    #[error("{url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("incomplete download: {missing} of {total} segments missing")]
    PartialDownload { missing: usize, total: usize },

    #[error("truncated body for {url}: expected {expected} bytes, got {received}")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("muxing failed: {reason}")]
    Mux { reason: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    /// Whether repeating the same request could succeed.
    ///
    /// Client errors are final except `408 Request Timeout` and
    /// `429 Too Many Requests`.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::Truncated { .. } | Self::Io { .. } => true,
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::UnsupportedProtocol { .. }
            | Self::Unsupported { .. }
            | Self::Unreachable { .. }
            | Self::ProxyConfiguration { .. }
            | Self::Playlist { .. }
            | Self::Decryption { .. }
            | Self::PartialDownload { .. }
            | Self::Mux { .. }
            | Self::Process(_)
            | Self::Internal { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Process(ProcessError::Cancelled { .. })
        )
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
