// AES-128 segment decryption and key retrieval.

use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use moka::future::Cache;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::DownloadError;
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Decrypt an AES-128-CBC segment with PKCS#7 padding.
pub fn decrypt_segment(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Bytes, DownloadError> {
    let mut buffer = data.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| DownloadError::decryption(format!("failed to initialize AES decryptor: {e}")))?;
    let len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| DownloadError::decryption(format!("decryption failed: {e}")))?
        .len();
    buffer.truncate(len);
    Ok(Bytes::from(buffer))
}

/// Fetches each key URI at most once per download.
#[derive(Clone)]
pub struct KeyCache {
    client: Client,
    retry: RetryPolicy,
    keys: Cache<Url, [u8; 16]>,
}

impl KeyCache {
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            keys: Cache::new(64),
        }
    }

    pub async fn get(&self, uri: &Url, token: &CancellationToken) -> Result<[u8; 16], DownloadError> {
        self.keys
            .try_get_with(uri.clone(), self.fetch(uri, token))
            .await
            .map_err(|e: Arc<DownloadError>| match e.as_ref() {
                DownloadError::Cancelled => DownloadError::Cancelled,
                other => DownloadError::decryption(format!("key {uri}: {other}")),
            })
    }

    async fn fetch(&self, uri: &Url, token: &CancellationToken) -> Result<[u8; 16], DownloadError> {
        debug!(uri = %uri, "Fetching decryption key");
        let body = retry_with_backoff(&self.retry, token, |_| {
            let client = self.client.clone();
            let uri = uri.clone();
            async move {
                let result = async {
                    let response = client.get(uri.clone()).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(DownloadError::http_status(status, uri.as_str(), "key fetch"));
                    }
                    Ok::<Bytes, DownloadError>(response.bytes().await?)
                }
                .await;
                RetryAction::from_result(result, DownloadError::is_retryable)
            }
        })
        .await
        .map_err(|e| e.into_inner(|| DownloadError::Cancelled))?;

        <[u8; 16]>::try_from(body.as_ref()).map_err(|_| {
            DownloadError::decryption(format!("key is {} bytes, expected 16", body.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipher::BlockEncryptMut;

    type Aes128CbcEnc = cbc::Encryptor<Aes128>;

    fn encrypt(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        Aes128CbcEnc::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plain)
    }

    #[test]
    fn round_trips_a_segment() {
        let key = [7u8; 16];
        let iv = [1u8; 16];
        let plain = b"transport stream payload".repeat(10);
        let encrypted = encrypt(&plain, &key, &iv);
        let decrypted = decrypt_segment(&encrypted, &key, &iv).unwrap();
        assert_eq!(decrypted.as_ref(), plain.as_slice());
    }

    #[test]
    fn wrong_key_fails_padding_check() {
        let encrypted = encrypt(b"payload", &[7u8; 16], &[1u8; 16]);
        // A wrong key almost always produces invalid padding.
        let result = decrypt_segment(&encrypted, &[8u8; 16], &[1u8; 16]);
        if let Ok(bytes) = result {
            assert_ne!(bytes.as_ref(), b"payload");
        }
    }

    #[tokio::test]
    async fn key_is_fetched_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/key.bin")
            .with_status(200)
            .with_body([9u8; 16])
            .expect(1)
            .create_async()
            .await;

        let cache = KeyCache::new(Client::new(), RetryPolicy::none());
        let uri = Url::parse(&format!("{}/key.bin", server.url())).unwrap();
        let token = CancellationToken::new();
        assert_eq!(cache.get(&uri, &token).await.unwrap(), [9u8; 16]);
        assert_eq!(cache.get(&uri, &token).await.unwrap(), [9u8; 16]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn short_key_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/short.bin")
            .with_status(200)
            .with_body([1u8; 4])
            .create_async()
            .await;

        let cache = KeyCache::new(Client::new(), RetryPolicy::none());
        let uri = Url::parse(&format!("{}/short.bin", server.url())).unwrap();
        let err = cache.get(&uri, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Decryption { .. }));
    }
}
