// Direct (non-manifest) downloads: the response body is streamed to disk.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use url::Url;

use crate::error::DownloadError;
use crate::output::PartFile;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

/// Stream `url` into `part`, retrying transient failures from scratch.
///
/// Every attempt starts from an empty file. A body shorter than its
/// `Content-Length` counts as a failed attempt. The part file is handed back
/// on success, ready to commit; on failure it is dropped and removed.
pub async fn download_direct(
    client: &Client,
    url: &Url,
    part: PartFile,
    retry: &RetryPolicy,
    token: &CancellationToken,
) -> Result<PartFile, DownloadError> {
    let part = Arc::new(Mutex::new(part));
    retry_with_backoff(retry, token, |_| {
        let client = client.clone();
        let url = url.clone();
        let part = part.clone();
        async move {
            let mut part = part.lock().await;
            let result = async {
                part.reset().await?;
                stream_once(&client, &url, &mut part).await
            }
            .await;
            RetryAction::from_result(result, DownloadError::is_retryable)
        }
    })
    .await
    .map_err(|e| e.into_inner(|| DownloadError::Cancelled))?;

    Arc::try_unwrap(part)
        .map(Mutex::into_inner)
        .map_err(|_| DownloadError::Internal {
            reason: "part file still shared after download".to_string(),
        })
}

async fn stream_once(
    client: &Client,
    url: &Url,
    part: &mut PartFile,
) -> Result<u64, DownloadError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::http_status(status, url.as_str(), "download"));
    }

    let expected = response.content_length();
    let span = Span::current();
    if let Some(len) = expected {
        span.pb_set_length(len);
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        part.write(&chunk).await?;
        span.pb_inc(chunk.len() as u64);
    }

    let received = part.written();
    if let Some(expected) = expected
        && received < expected
    {
        return Err(DownloadError::Truncated {
            url: url.to_string(),
            expected,
            received,
        });
    }
    debug!(url = %url, bytes = received, "Direct download finished");
    Ok(received)
}
