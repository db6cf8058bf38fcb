//! File configuration (`config.toml`) and its merge with command-line flags.
//!
//! ```toml
//! [download]
//! output_dir = "dl"
//! concurrency = 4
//!
//! [source]
//! instances = ["https://nitter.example"]
//!
//! [upload]
//! folder = "tw/{username}"
//!
//! [http]
//! timeout_secs = 0
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hoard_engine::{
    DownloaderConfig, EngineKind, ProtocolAllowList, ProxyConfig, ProxyType, RemuxMode,
    RetryPolicy, VariantPolicy,
};
use hoard_sources::nitter::DEFAULT_DISCOVERY_URL;
use hoard_sources::{NitterConfig, TimelineSource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

const CONFIG_DIR_NAME: &str = "hoard";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadSection,
    pub source: SourceSection,
    pub upload: UploadSection,
    pub http: HttpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub output_dir: PathBuf,
    /// Items processed in parallel.
    pub concurrency: usize,
    /// Segments fetched in parallel within one item.
    pub segment_concurrency: usize,
    pub engine: EngineKind,
    pub remux: RemuxMode,
    pub variant: VariantPolicy,
    pub ffmpeg_path: PathBuf,
    pub allowed_protocols: Vec<String>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            output_dir: PathBuf::from("dl"),
            concurrency: 4,
            segment_concurrency: 4,
            engine: EngineKind::default(),
            remux: RemuxMode::default(),
            variant: VariantPolicy::default(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            allowed_protocols: vec!["http".to_string(), "https".to_string()],
            max_retries: retry.max_retries,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl DownloadSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms.max(self.retry_base_delay_ms)),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    /// Fixed Nitter instances; discovery is used when empty.
    pub instances: Vec<String>,
    /// Discover among the US-hosted instances of the wiki table instead of
    /// following `discovery_url`.
    pub us_only: bool,
    pub instance_list_url: String,
    pub discovery_url: Option<String>,
    pub bad_instances: Vec<String>,
    pub age_restricted_instances: Vec<String>,
    pub timeline: TimelineSource,
    pub max_pages: u32,
    pub pages_per_instance: u32,
    pub switch_delay_secs: u64,
    pub max_switch_attempts: u32,
    pub cookies: Option<String>,
}

impl Default for SourceSection {
    fn default() -> Self {
        let nitter = NitterConfig::default();
        Self {
            instances: nitter.instances,
            us_only: nitter.us_only,
            instance_list_url: nitter.instance_list_url,
            discovery_url: Some(DEFAULT_DISCOVERY_URL.to_string()),
            bad_instances: nitter.bad_instances,
            age_restricted_instances: nitter.age_restricted_instances,
            timeline: nitter.source,
            max_pages: nitter.max_pages,
            pages_per_instance: nitter.pages_per_instance,
            switch_delay_secs: nitter.switch_delay.as_secs(),
            max_switch_attempts: nitter.max_switch_attempts,
            cookies: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub enabled: bool,
    pub rclone_path: PathBuf,
    /// rclone backend name, used as `:<backend>:` remote.
    pub backend: String,
    /// Remote folder, `{username}` is replaced.
    pub folder: String,
    /// Environment variables holding the account.
    pub user_env: String,
    pub password_env: String,
    /// JSON `["user", "password"]` fallback when the variables are unset.
    pub credentials_file: PathBuf,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rclone_path: PathBuf::from("rclone"),
            backend: hoard_remote::rclone::DEFAULT_BACKEND.to_string(),
            folder: "tw/{username}".to_string(),
            user_env: "MEGA_EMAIL".to_string(),
            password_env: "MEGA_PASSWORD".to_string(),
            credentials_file: PathBuf::from("creds_mega.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub user_agent: Option<String>,
    /// Whole-request timeout, 0 for none.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub use_system_proxy: bool,
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: 0,
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            proxy: None,
            proxy_username: None,
            proxy_password: None,
            use_system_proxy: true,
            headers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Default configuration file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load `path`, or the default file if it exists, or defaults.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| AppError::ConfigFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml(&content).map_err(|e| AppError::ConfigFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command-line overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(dir) = &args.output_dir {
            self.download.output_dir = dir.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.download.concurrency = concurrency as usize;
        }
        if let Some(engine) = args.engine {
            self.download.engine = engine;
        }
        if let Some(remux) = args.remux {
            self.download.remux = remux;
        }
        if let Some(source) = args.source {
            self.source.timeline = source;
        }
        if !args.instances.is_empty() {
            self.source.instances = args.instances.clone();
        }
        if let Some(max_pages) = args.max_pages {
            self.source.max_pages = max_pages;
        }
        if let Some(proxy) = &args.proxy {
            self.http.proxy = Some(proxy.clone());
        }
        if args.no_upload {
            self.upload.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(AppError::Config("download.concurrency must be at least 1".into()));
        }
        if self.download.segment_concurrency == 0 {
            return Err(AppError::Config(
                "download.segment_concurrency must be at least 1".into(),
            ));
        }
        if self.source.instances.is_empty()
            && !self.source.us_only
            && self.source.discovery_url.is_none()
        {
            return Err(AppError::Config(
                "source.instances is empty, us_only is off and no discovery_url is set".into(),
            ));
        }
        if self.upload.folder.trim().is_empty() {
            return Err(AppError::Config("upload.folder must not be empty".into()));
        }
        Ok(())
    }

    pub fn nitter_config(&self) -> NitterConfig {
        NitterConfig {
            instances: self.source.instances.clone(),
            us_only: self.source.us_only,
            instance_list_url: self.source.instance_list_url.clone(),
            discovery_url: self.source.discovery_url.clone(),
            bad_instances: self.source.bad_instances.clone(),
            age_restricted_instances: self.source.age_restricted_instances.clone(),
            source: self.source.timeline,
            pages_per_instance: self.source.pages_per_instance,
            switch_delay: Duration::from_secs(self.source.switch_delay_secs),
            max_switch_attempts: self.source.max_switch_attempts,
            max_pages: self.source.max_pages,
            cookies: self.source.cookies.clone(),
        }
    }

    pub fn proxy_config(&self) -> Result<Option<ProxyConfig>> {
        let Some(url) = self.http.proxy.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let scheme = url.split("://").next().unwrap_or_default().to_ascii_lowercase();
        let proxy_type = match scheme.as_str() {
            "http" => ProxyType::Http,
            "https" => ProxyType::Https,
            "socks5" | "socks5h" => ProxyType::Socks5,
            other => {
                return Err(AppError::Config(format!(
                    "unsupported proxy scheme `{other}`"
                )));
            }
        };
        let auth = match (&self.http.proxy_username, &self.http.proxy_password) {
            (Some(username), Some(password)) => Some(hoard_engine::ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        Ok(Some(ProxyConfig {
            url: url.to_string(),
            proxy_type,
            auth,
        }))
    }

    pub fn downloader_config(&self) -> Result<DownloaderConfig> {
        let mut config = DownloaderConfig {
            timeout: Duration::from_secs(self.http.timeout_secs),
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.http.read_timeout_secs),
            proxy: self.proxy_config()?,
            use_system_proxy: self.http.use_system_proxy,
            allowed_protocols: ProtocolAllowList::new(&self.download.allowed_protocols),
            retry: self.download.retry_policy(),
            segment_concurrency: self.download.segment_concurrency,
            variant_policy: self.download.variant,
            remux: self.download.remux,
            engine: self.download.engine,
            ffmpeg_path: self.download.ffmpeg_path.clone(),
            ..DownloaderConfig::default()
        };
        if let Some(ua) = &self.http.user_agent {
            config.user_agent = ua.clone();
        }
        for (name, value) in &self.http.headers {
            if !config.add_header(name, value) {
                return Err(AppError::Config(format!("invalid header `{name}`")));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.download.output_dir, PathBuf::from("dl"));
        assert_eq!(config.download.concurrency, 4);
        assert_eq!(config.upload.folder, "tw/{username}");
        assert_eq!(config.upload.user_env, "MEGA_EMAIL");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_are_parsed() {
        let config = AppConfig::from_toml(
            r#"
[download]
output_dir = "/srv/archive"
concurrency = 2
engine = "ffmpeg"
remux = "never"
variant = "lowest_bitrate"

[source]
instances = ["https://nitter.example"]
timeline = "media"

[upload]
enabled = false
folder = "backup/{username}"

[http]
proxy = "socks5://127.0.0.1:1080"

[http.headers]
Referer = "https://nitter.example/"
"#,
        )
        .unwrap();
        assert_eq!(config.download.concurrency, 2);
        assert_eq!(config.download.engine, EngineKind::Ffmpeg);
        assert_eq!(config.download.variant, VariantPolicy::LowestBitrate);
        assert_eq!(config.source.timeline, TimelineSource::Media);
        assert!(!config.upload.enabled);

        let downloader = config.downloader_config().unwrap();
        assert_eq!(downloader.remux, RemuxMode::Never);
        assert_eq!(
            downloader.proxy.map(|p| p.proxy_type),
            Some(ProxyType::Socks5)
        );
        assert!(downloader.headers.contains_key("referer"));
    }

    #[test]
    fn flags_override_file() {
        let mut config = AppConfig::from_toml("[download]\nconcurrency = 8\n").unwrap();
        let args = Args::try_parse_from([
            "hoard",
            "alice",
            "-j",
            "3",
            "--instance",
            "https://n.example",
            "--no-upload",
        ])
        .unwrap();
        config.apply_args(&args);
        assert_eq!(config.download.concurrency, 3);
        assert_eq!(config.source.instances, ["https://n.example"]);
        assert!(!config.upload.enabled);
        assert_eq!(config.nitter_config().instances, ["https://n.example"]);
    }

    #[test]
    fn instance_discovery_settings() {
        let defaults = AppConfig::default().nitter_config();
        assert!(defaults.us_only);
        assert!(defaults.bad_instances.iter().any(|h| h == "nitter.d420.de"));
        assert!(defaults.age_restricted_instances.iter().any(|h| h == "nitter.pw"));

        let mut config = AppConfig::from_toml(
            "[source]\nus_only = false\nbad_instances = [\"slow.example\"]\n",
        )
        .unwrap();
        let nitter = config.nitter_config();
        assert!(!nitter.us_only);
        assert_eq!(nitter.bad_instances, ["slow.example"]);
        assert!(config.validate().is_ok());

        config.source.discovery_url = None;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn bad_proxy_scheme_is_rejected() {
        let mut config = AppConfig::default();
        config.http.proxy = Some("ftp://proxy".into());
        assert!(matches!(config.proxy_config(), Err(AppError::Config(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, AppError::ConfigFile { .. }));
    }
}
