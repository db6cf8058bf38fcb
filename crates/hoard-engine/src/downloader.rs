//! Turns a [`ResolvedMedia`] into one file on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use indicatif::ProgressStyle;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use url::Url;

use crate::client::build_client;
use crate::config::{DownloaderConfig, EngineKind, RemuxMode};
use crate::direct::download_direct;
use crate::error::DownloadError;
use crate::hls::{HlsMedia, InitSection, SegmentFetcher};
use crate::manifest::{ManifestFetcher, ResolvedMedia};
use crate::mux::{Muxer, container_format};
use crate::output::{PartFile, with_suffix};

/// Result of a successful [`Downloader::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    /// Segments written, for native HLS downloads.
    pub segments: Option<usize>,
    /// The destination already existed and was left untouched.
    pub skipped: bool,
}

/// File extension for a resolved media, `None` when the caller should
/// decide (direct downloads of unknown type).
pub fn output_extension(media: &ResolvedMedia, config: &DownloaderConfig) -> Option<&'static str> {
    match media {
        ResolvedMedia::Hls(hls)
            if config.engine == EngineKind::Native
                && config.remux == RemuxMode::Never
                && !hls.is_fmp4() =>
        {
            Some("ts")
        }
        ResolvedMedia::Hls(_) | ResolvedMedia::Dash { .. } => Some("mp4"),
        ResolvedMedia::Direct { content_type, .. } => {
            let mime = content_type.as_deref()?.split(';').next()?.trim();
            match mime.to_ascii_lowercase().as_str() {
                "image/jpeg" | "image/jpg" => Some("jpg"),
                "image/png" => Some("png"),
                "image/webp" => Some("webp"),
                "image/gif" => Some("gif"),
                "video/mp4" => Some("mp4"),
                "video/webm" => Some("webm"),
                "video/quicktime" => Some("mov"),
                "video/mp2t" => Some("ts"),
                _ => None,
            }
        }
    }
}

fn progress_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Downloads resolved media, sharing one HTTP client and key cache.
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    config: Arc<DownloaderConfig>,
    segments: SegmentFetcher,
    muxer: Muxer,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = build_client(&config)?;
        Ok(Self::with_client(client, Arc::new(config)))
    }

    pub fn with_client(client: Client, config: Arc<DownloaderConfig>) -> Self {
        let segments = SegmentFetcher::new(client.clone(), config.retry.clone());
        let muxer = Muxer::new(&config);
        Self {
            client,
            config,
            segments,
            muxer,
        }
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// A manifest fetcher using the same client and configuration.
    pub fn manifest_fetcher(&self) -> ManifestFetcher {
        ManifestFetcher::new(self.client.clone(), self.config.clone())
    }

    /// Download `media` into `dest`.
    ///
    /// Nothing is written under `dest` unless the download completes; an
    /// existing `dest` is reported as skipped and left as is.
    pub async fn download(
        &self,
        media: &ResolvedMedia,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        if tokio::fs::try_exists(dest).await? {
            let bytes = tokio::fs::metadata(dest).await?.len();
            info!(path = %dest.display(), "Output already exists, skipping");
            return Ok(DownloadOutcome {
                path: dest.to_path_buf(),
                bytes,
                segments: None,
                skipped: true,
            });
        }

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let span = info_span!("download", file = %name, kind = %media.kind());

        let result = match media {
            ResolvedMedia::Hls(hls) if self.config.engine == EngineKind::Native => {
                self.download_hls(hls, dest, token).instrument(span).await
            }
            ResolvedMedia::Hls(HlsMedia { playlist_url, .. }) | ResolvedMedia::Dash { url: playlist_url } => {
                self.download_with_ffmpeg(playlist_url, dest, token)
                    .instrument(span)
                    .await
            }
            ResolvedMedia::Direct { url, .. } => {
                self.download_file(url, dest, token).instrument(span).await
            }
        };

        match result {
            Err(e) if e.is_cancelled() => Err(DownloadError::Cancelled),
            other => other,
        }
    }

    async fn download_hls(
        &self,
        media: &HlsMedia,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        let total = media.segments.len();
        let span = Span::current();
        span.pb_set_style(&progress_style(
            "{span_child_prefix}{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} segments {msg}",
        ));
        span.pb_set_length(total as u64);
        span.pb_set_message(&dest.file_name().unwrap_or_default().to_string_lossy());

        let remux = self.config.remux == RemuxMode::Auto;
        let stream_target = if remux {
            with_suffix(dest, ".concat")
        } else {
            dest.to_path_buf()
        };
        let mut concat = PartFile::create(&stream_target).await?;
        self.write_segments(media, &mut concat, token).await?;

        let bytes = if remux {
            concat.close().await?;
            let out = PartFile::reserve(dest).await?;
            let codec = self
                .muxer
                .remux(concat.part_path(), out.part_path(), container_format(dest), token)
                .await?;
            debug!(?codec, "Remuxed segments");
            drop(concat);
            out.commit().await?
        } else {
            concat.commit().await?
        };

        info!(path = %dest.display(), segments = total, bytes, "HLS download complete");
        Ok(DownloadOutcome {
            path: dest.to_path_buf(),
            bytes,
            segments: Some(total),
            skipped: false,
        })
    }

    /// Fetch all segments in order into `out`.
    ///
    /// After the first missing segment nothing more is written, but the rest
    /// are still fetched so the error reports how many are missing.
    async fn write_segments(
        &self,
        media: &HlsMedia,
        out: &mut PartFile,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let total = media.segments.len();
        let span = Span::current();
        let mut fetched = futures::stream::iter(media.segments.iter().cloned())
            .map(|segment| {
                let fetcher = self.segments.clone();
                let token = token.clone();
                async move {
                    let result = fetcher.fetch(&segment, &token).await;
                    (segment, result)
                }
            })
            .buffered(self.config.segment_concurrency.max(1));

        let mut missing = 0usize;
        let mut current_init: Option<InitSection> = None;
        while let Some((segment, result)) = fetched.next().await {
            let data = match result {
                Ok(data) => data,
                Err(e) if e.is_cancelled() => return Err(DownloadError::Cancelled),
                Err(e) => {
                    warn!(sequence = segment.sequence, url = %segment.url, error = %e, "Segment missing");
                    missing += 1;
                    continue;
                }
            };
            if missing > 0 {
                continue;
            }

            if segment.init != current_init {
                if let Some(init) = &segment.init {
                    let init_data = self.segments.fetch_init(init, token).await?;
                    out.write(&init_data).await?;
                }
                current_init = segment.init.clone();
            }
            out.write(&data).await?;
            span.pb_inc(1);
        }

        if missing > 0 {
            return Err(DownloadError::PartialDownload { missing, total });
        }
        Ok(())
    }

    async fn download_with_ffmpeg(
        &self,
        url: &Url,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        Span::current().pb_set_style(&progress_style("{span_child_prefix}{spinner:.green} ffmpeg {msg}"));
        let out = PartFile::reserve(dest).await?;
        self.muxer
            .fetch(url, out.part_path(), container_format(dest), token)
            .await?;
        let bytes = out.commit().await?;
        info!(path = %dest.display(), bytes, "ffmpeg download complete");
        Ok(DownloadOutcome {
            path: dest.to_path_buf(),
            bytes,
            segments: None,
            skipped: false,
        })
    }

    async fn download_file(
        &self,
        url: &Url,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        Span::current().pb_set_style(&progress_style(
            "{span_child_prefix}{spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}",
        ));
        let part = PartFile::create(dest).await?;
        let part = download_direct(&self.client, url, part, &self.config.retry, token).await?;
        let bytes = part.commit().await?;
        info!(path = %dest.display(), bytes, "Download complete");
        Ok(DownloadOutcome {
            path: dest.to_path_buf(),
            bytes,
            segments: None,
            skipped: false,
        })
    }
}
