use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::proxy::ProxyConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Schemes fetched when no allow-list is configured.
pub const DEFAULT_ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Which media playlist of a master playlist is downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantPolicy {
    #[default]
    HighestBitrate,
    LowestBitrate,
    /// Variant whose bandwidth is closest to the given bits per second.
    ClosestToBitrate(u64),
}

/// What happens to a concatenated HLS stream once all segments are on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum RemuxMode {
    /// Stream-copy into the target container, transcoding if copying fails.
    #[default]
    Auto,
    /// Keep the concatenated stream as is.
    Never,
}

/// Engine used for streaming manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum EngineKind {
    /// Built-in segment downloader (DASH still goes through ffmpeg).
    #[default]
    Native,
    /// Hand the manifest URL to ffmpeg.
    Ffmpeg,
}

/// Protocols the engine may talk to.
///
/// Applied to manifest, segment and key URLs, to HTTP redirects and to the
/// `-protocol_whitelist` given to ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolAllowList {
    schemes: BTreeSet<String>,
}

impl Default for ProtocolAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_SCHEMES.iter().copied())
    }
}

impl ProtocolAllowList {
    pub fn new<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            schemes: schemes
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn allows(&self, scheme: &str) -> bool {
        self.schemes.contains(&scheme.to_ascii_lowercase())
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.schemes.iter().map(String::as_str)
    }

    /// Value for ffmpeg's `-protocol_whitelist` when it fetches remote input.
    ///
    /// ffmpeg needs `tcp`/`tls`/`crypto` underneath HTTP(S) and AES-128 HLS.
    /// `file` is only present if the allow-list names it.
    pub fn ffmpeg_whitelist(&self) -> String {
        let mut protocols: BTreeSet<&str> = self.schemes().collect();
        if self.allows("http") || self.allows("https") {
            protocols.extend(["tcp", "tls", "crypto"]);
        }
        protocols.into_iter().collect::<Vec<_>>().join(",")
    }
}

/// Configurable options for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a single request, zero for none.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub allowed_protocols: ProtocolAllowList,

    /// Retry policy for segments, keys and direct downloads.
    pub retry: RetryPolicy,

    /// Segments fetched concurrently for one item.
    pub segment_concurrency: usize,

    pub variant_policy: VariantPolicy,

    pub remux: RemuxMode,

    pub engine: EngineKind,

    /// ffmpeg binary used for muxing and the ffmpeg engine.
    pub ffmpeg_path: PathBuf,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            allowed_protocols: ProtocolAllowList::default(),
            retry: RetryPolicy::default(),
            segment_concurrency: 4,
            variant_policy: VariantPolicy::default(),
            remux: RemuxMode::default(),
            engine: EngineKind::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }

    /// Add a header, returning `false` when the name or value is invalid.
    pub fn add_header(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    /// Set the `Cookie` header from a `name=value; ...` string.
    pub fn set_cookies(&mut self, cookies: &str) -> bool {
        let cookies = cookies.trim();
        !cookies.is_empty() && self.add_header(reqwest::header::COOKIE.as_str(), cookies)
    }

    /// Headers as `Name: value` lines, for ffmpeg's `-headers`.
    pub fn header_lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| format!("{}: {}", name.as_str(), v))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_case_insensitive() {
        let list = ProtocolAllowList::new(["HTTPS", " http "]);
        assert!(list.allows("https"));
        assert!(list.allows("HTTP"));
        assert!(!list.allows("file"));
        assert!(!list.allows("rtmp"));
    }

    #[test]
    fn ffmpeg_whitelist_adds_transport_protocols() {
        let list = ProtocolAllowList::default();
        assert_eq!(list.ffmpeg_whitelist(), "crypto,http,https,tcp,tls");

        let https_only = ProtocolAllowList::new(["https"]);
        assert_eq!(https_only.ffmpeg_whitelist(), "crypto,https,tcp,tls");

        let empty = ProtocolAllowList::new(Vec::<String>::new());
        assert_eq!(empty.ffmpeg_whitelist(), "");
    }

    #[test]
    fn headers_and_cookies() {
        let mut config = DownloaderConfig::default();
        assert!(config.add_header("Referer", "https://nitter.example/"));
        assert!(!config.add_header("bad header", "x"));
        assert!(config.set_cookies("a=1; b=2"));
        assert!(!config.set_cookies("  "));

        let lines = config.header_lines();
        assert!(lines.contains(&"referer: https://nitter.example/".to_string()));
        assert!(lines.contains(&"cookie: a=1; b=2".to_string()));
    }
}
