//! Manifest resolution: given a media URL, work out what kind of resource it
//! is and, for HLS, which segments make it up.
//!
//! Every failure is reported as either [`DownloadError::Unreachable`] (the
//! resource could not be fetched) or [`DownloadError::Unsupported`] (it was
//! fetched but cannot be handled), plus `Cancelled` and `UnsupportedProtocol`.

use std::sync::Arc;

use bytes::Bytes;
use m3u8_rs::Playlist;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::client::checked_url;
use crate::config::DownloaderConfig;
use crate::error::DownloadError;
use crate::hls::{HlsMedia, parse_playlist, plan_segments, select_variant};
use crate::retry::{RetryAction, retry_with_backoff};

/// Master playlists may point at another master at most this deep.
const MAX_PLAYLIST_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Hls,
    Dash,
    Direct,
}

impl ManifestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hls => "hls",
            Self::Dash => "dash",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const HLS_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];
const DASH_CONTENT_TYPES: &[&str] = &["application/dash+xml"];
const DIRECT_CONTENT_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "webm", "mkv", "ts", "jpg", "jpeg", "png", "gif", "webp",
];

fn url_extension(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Classify a response by its `Content-Type`, falling back to the URL
/// extension when the server sends something generic.
pub fn classify(content_type: Option<&str>, url: &Url) -> Option<ManifestKind> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if HLS_CONTENT_TYPES.contains(&mime.as_str()) {
        return Some(ManifestKind::Hls);
    }
    if DASH_CONTENT_TYPES.contains(&mime.as_str()) {
        return Some(ManifestKind::Dash);
    }

    let ext = url_extension(url);
    match ext.as_deref() {
        Some("m3u8") => return Some(ManifestKind::Hls),
        Some("mpd") => return Some(ManifestKind::Dash),
        _ => {}
    }

    if mime.starts_with("video/")
        || mime.starts_with("image/")
        || mime.starts_with("audio/")
        || DIRECT_CONTENT_TYPES.contains(&mime.as_str())
    {
        return Some(ManifestKind::Direct);
    }
    match ext.as_deref() {
        Some(ext) if MEDIA_EXTENSIONS.contains(&ext) => Some(ManifestKind::Direct),
        _ => None,
    }
}

/// A media URL resolved into something the downloader can act on.
#[derive(Debug, Clone)]
pub enum ResolvedMedia {
    Hls(HlsMedia),
    Dash {
        url: Url,
    },
    Direct {
        url: Url,
        content_type: Option<String>,
        content_length: Option<u64>,
    },
}

impl ResolvedMedia {
    pub fn kind(&self) -> ManifestKind {
        match self {
            Self::Hls(_) => ManifestKind::Hls,
            Self::Dash { .. } => ManifestKind::Dash,
            Self::Direct { .. } => ManifestKind::Direct,
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::Hls(media) => &media.playlist_url,
            Self::Dash { url } | Self::Direct { url, .. } => url,
        }
    }
}

struct Fetched {
    url: Url,
    content_type: Option<String>,
    content_length: Option<u64>,
    body: Option<Bytes>,
}

pub struct ManifestFetcher {
    client: Client,
    config: Arc<DownloaderConfig>,
}

impl ManifestFetcher {
    pub fn new(client: Client, config: Arc<DownloaderConfig>) -> Self {
        Self { client, config }
    }

    /// Resolve `url` into a downloadable resource.
    pub async fn resolve(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<ResolvedMedia, DownloadError> {
        let resolved = async {
            let url = checked_url(url, &self.config.allowed_protocols)?;
            self.resolve_url(url, token).await
        }
        .await;

        match resolved {
            Ok(media) => {
                info!(url, kind = %media.kind(), "Resolved manifest");
                Ok(media)
            }
            Err(e) => Err(Self::classify_error(url, e)),
        }
    }

    /// Collapse internal errors into the two failure kinds callers see.
    fn classify_error(url: &str, error: DownloadError) -> DownloadError {
        match error {
            e @ (DownloadError::Cancelled
            | DownloadError::UnsupportedProtocol { .. }
            | DownloadError::Unsupported { .. }
            | DownloadError::Unreachable { .. }) => e,
            DownloadError::InvalidUrl { reason, .. }
            | DownloadError::Playlist { reason }
            | DownloadError::Decryption { reason } => DownloadError::unsupported(url, reason),
            DownloadError::Network { source } if source.is_redirect() => {
                DownloadError::unsupported(url, source.to_string())
            }
            other => DownloadError::unreachable(url, other.to_string()),
        }
    }

    async fn resolve_url(
        &self,
        url: Url,
        token: &CancellationToken,
    ) -> Result<ResolvedMedia, DownloadError> {
        let mut current = url;
        for _ in 0..MAX_PLAYLIST_DEPTH {
            let fetched = self.fetch(&current, token).await?;
            let kind = classify(fetched.content_type.as_deref(), &fetched.url).ok_or_else(|| {
                DownloadError::unsupported(
                    fetched.url.as_str(),
                    format!(
                        "unrecognized content type `{}`",
                        fetched.content_type.as_deref().unwrap_or("none")
                    ),
                )
            })?;

            match kind {
                ManifestKind::Dash => return Ok(ResolvedMedia::Dash { url: fetched.url }),
                ManifestKind::Direct => {
                    return Ok(ResolvedMedia::Direct {
                        url: fetched.url,
                        content_type: fetched.content_type,
                        content_length: fetched.content_length,
                    });
                }
                ManifestKind::Hls => {
                    let body = fetched.body.unwrap_or_default();
                    match parse_playlist(&body, &fetched.url)? {
                        Playlist::MasterPlaylist(master) => {
                            current = select_variant(
                                &master,
                                &fetched.url,
                                self.config.variant_policy,
                                &self.config.allowed_protocols,
                            )?;
                            debug!(variant = %current, "Following variant playlist");
                        }
                        Playlist::MediaPlaylist(media) => {
                            let planned =
                                plan_segments(&media, &fetched.url, &self.config.allowed_protocols)?;
                            if planned.segments.is_empty() {
                                return Err(DownloadError::playlist("media playlist has no segments"));
                            }
                            return Ok(ResolvedMedia::Hls(planned));
                        }
                    }
                }
            }
        }
        Err(DownloadError::playlist("too many nested master playlists"))
    }

    /// GET `url`, reading the body only for manifests.
    async fn fetch(&self, url: &Url, token: &CancellationToken) -> Result<Fetched, DownloadError> {
        retry_with_backoff(&self.config.retry, token, |_| {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let result = async {
                    let response = client.get(url.clone()).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(DownloadError::http_status(status, url.as_str(), "manifest fetch"));
                    }
                    let final_url = response.url().clone();
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(ToOwned::to_owned);
                    let content_length = response.content_length();
                    let body = match classify(content_type.as_deref(), &final_url) {
                        Some(ManifestKind::Hls) => Some(response.bytes().await?),
                        _ => None,
                    };
                    Ok::<Fetched, DownloadError>(Fetched {
                        url: final_url,
                        content_type,
                        content_length,
                        body,
                    })
                }
                .await;
                RetryAction::from_result(result, DownloadError::is_retryable)
            }
        })
        .await
        .map_err(|e| e.into_inner(|| DownloadError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("application/vnd.apple.mpegurl"), "https://a/x", Some(ManifestKind::Hls))]
    #[case(Some("application/x-mpegURL; charset=utf-8"), "https://a/x", Some(ManifestKind::Hls))]
    #[case(Some("text/plain"), "https://a/x.m3u8?t=1", Some(ManifestKind::Hls))]
    #[case(Some("application/dash+xml"), "https://a/x", Some(ManifestKind::Dash))]
    #[case(None, "https://a/manifest.mpd", Some(ManifestKind::Dash))]
    #[case(Some("video/mp4"), "https://a/v", Some(ManifestKind::Direct))]
    #[case(Some("image/jpeg"), "https://a/p", Some(ManifestKind::Direct))]
    #[case(Some("text/plain"), "https://a/clip.MP4", Some(ManifestKind::Direct))]
    #[case(Some("text/html"), "https://a/page", None)]
    #[case(None, "https://a/", None)]
    fn classification(
        #[case] content_type: Option<&str>,
        #[case] url: &str,
        #[case] expected: Option<ManifestKind>,
    ) {
        assert_eq!(classify(content_type, &Url::parse(url).unwrap()), expected);
    }

    #[test]
    fn errors_collapse_to_two_kinds() {
        let not_found = DownloadError::http_status(
            reqwest::StatusCode::NOT_FOUND,
            "https://a/x.m3u8",
            "manifest fetch",
        );
        assert!(matches!(
            ManifestFetcher::classify_error("https://a/x.m3u8", not_found),
            DownloadError::Unreachable { .. }
        ));
        assert!(matches!(
            ManifestFetcher::classify_error("u", DownloadError::playlist("bad")),
            DownloadError::Unsupported { .. }
        ));
        assert!(matches!(
            ManifestFetcher::classify_error("u", DownloadError::Cancelled),
            DownloadError::Cancelled
        ));
    }
}
