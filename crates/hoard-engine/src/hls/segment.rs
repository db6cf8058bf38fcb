// HLS segment fetcher: downloads single segments and init sections with
// bounded retries, decrypting AES-128 segments on the blocking pool.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::error::DownloadError;
use crate::hls::decryption::{KeyCache, decrypt_segment};
use crate::hls::playlist::{ByteSpan, InitSection, SegmentPlan};
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

#[derive(Clone)]
pub struct SegmentFetcher {
    client: Client,
    retry: RetryPolicy,
    keys: KeyCache,
}

impl SegmentFetcher {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        let keys = KeyCache::new(client.clone(), retry.clone());
        Self {
            client,
            retry,
            keys,
        }
    }

    /// Download and, if needed, decrypt one segment.
    ///
    /// 4xx responses other than 408/429 fail at once. Everything transient is
    /// retried according to the configured policy.
    pub async fn fetch(
        &self,
        segment: &SegmentPlan,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let data = self
            .fetch_bytes(&segment.url, segment.byte_range, "segment", token)
            .await?;

        let Some(key) = &segment.key else {
            return Ok(data);
        };
        let key_bytes = self.keys.get(&key.uri, token).await?;
        let iv = key.iv;
        tokio::task::spawn_blocking(move || decrypt_segment(&data, &key_bytes, &iv))
            .await
            .map_err(|e| DownloadError::Internal {
                reason: format!("decryption task failed: {e}"),
            })?
    }

    pub async fn fetch_init(
        &self,
        init: &InitSection,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        self.fetch_bytes(&init.url, init.byte_range, "init section", token)
            .await
    }

    async fn fetch_bytes(
        &self,
        url: &Url,
        range: Option<ByteSpan>,
        operation: &'static str,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        retry_with_backoff(&self.retry, token, |attempt| {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                trace!(url = %url, attempt, "Fetching {operation}");
                let result = fetch_once(&client, &url, range, operation).await;
                RetryAction::from_result(result, DownloadError::is_retryable)
            }
        })
        .await
        .map_err(|e| e.into_inner(|| DownloadError::Cancelled))
    }
}

async fn fetch_once(
    client: &Client,
    url: &Url,
    range: Option<ByteSpan>,
    operation: &'static str,
) -> Result<Bytes, DownloadError> {
    let mut request = client.get(url.clone());
    if let Some(range) = range {
        request = request.header(reqwest::header::RANGE, range.header_value());
    }
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::http_status(status, url.as_str(), operation));
    }

    let expected = response.content_length();

    let mut buffer = BytesMut::with_capacity(expected.unwrap_or(0) as usize);
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected
        && (buffer.len() as u64) < expected
    {
        return Err(DownloadError::Truncated {
            url: url.to_string(),
            expected,
            received: buffer.len() as u64,
        });
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::playlist::SegmentKey;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn plan(url: Url) -> SegmentPlan {
        SegmentPlan {
            sequence: 0,
            url,
            duration: 4.0,
            byte_range: None,
            key: None,
            init: None,
        }
    }

    #[tokio::test]
    async fn retries_server_errors_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/seg0.ts")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let fetcher = SegmentFetcher::new(Client::new(), fast_retry());
        let url = Url::parse(&format!("{}/seg0.ts", server.url())).unwrap();
        let err = fetcher
            .fetch(&plan(url), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gone.ts")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let fetcher = SegmentFetcher::new(Client::new(), fast_retry());
        let url = Url::parse(&format!("{}/gone.ts", server.url())).unwrap();
        assert!(
            fetcher
                .fetch(&plan(url), &CancellationToken::new())
                .await
                .is_err()
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_range_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/all.ts")
            .match_header("range", "bytes=100-149")
            .with_status(206)
            .with_body(vec![0x47u8; 50])
            .create_async()
            .await;

        let fetcher = SegmentFetcher::new(Client::new(), fast_retry());
        let mut segment = plan(Url::parse(&format!("{}/all.ts", server.url())).unwrap());
        segment.byte_range = Some(ByteSpan {
            offset: 100,
            length: 50,
        });
        let data = fetcher
            .fetch(&segment, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(data.len(), 50);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_key_is_a_decryption_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/enc.ts")
            .with_body(vec![0u8; 32])
            .create_async()
            .await;
        server
            .mock("GET", "/key.bin")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = SegmentFetcher::new(Client::new(), fast_retry());
        let mut segment = plan(Url::parse(&format!("{}/enc.ts", server.url())).unwrap());
        segment.key = Some(SegmentKey {
            uri: Url::parse(&format!("{}/key.bin", server.url())).unwrap(),
            iv: [0u8; 16],
        });
        let err = fetcher
            .fetch(&segment, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Decryption { .. }));
    }
}
