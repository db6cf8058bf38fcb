//! Download engine for hoard.
//!
//! [`ManifestFetcher`] resolves a media URL into HLS, DASH or a direct file,
//! and [`Downloader`] writes it to disk: natively segment by segment for HLS,
//! through ffmpeg for DASH, or by streaming the body for direct files.

pub mod client;
pub mod config;
pub mod direct;
pub mod downloader;
pub mod error;
pub mod hls;
pub mod manifest;
pub mod mux;
pub mod output;
pub mod proxy;
pub mod retry;

pub use client::{build_client, checked_url};
pub use config::{
    DownloaderConfig, EngineKind, ProtocolAllowList, RemuxMode, VariantPolicy,
};
pub use downloader::{DownloadOutcome, Downloader, output_extension};
pub use error::DownloadError;
pub use manifest::{ManifestFetcher, ManifestKind, ResolvedMedia, classify};
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
pub use retry::{RetryAction, RetryError, RetryPolicy, retry_with_backoff};
