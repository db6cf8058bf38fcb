use reqwest::Proxy;
use serde::{Deserialize, Serialize};

/// Proxy configuration types
#[derive(Debug, Clone, PartialEq, Eq, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    /// HTTP proxy
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

/// Proxy authentication.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    /// Type of proxy (HTTP, HTTPS, SOCKS5)
    pub proxy_type: ProxyType,
    /// Authentication for the proxy (optional)
    #[serde(default)]
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// URL form understood by ffmpeg's `-http_proxy`, when the proxy is HTTP.
    pub fn ffmpeg_url(&self) -> Option<String> {
        match self.proxy_type {
            ProxyType::Http | ProxyType::Https => Some(self.url.clone()),
            ProxyType::Socks5 => None,
        }
    }
}

/// Build a reqwest Proxy object from our proxy configuration
pub fn build_proxy_from_config(config: &ProxyConfig) -> Result<Proxy, String> {
    let proxy_url = &config.url;

    let mut proxy = match config.proxy_type {
        ProxyType::Http => {
            Proxy::http(proxy_url).map_err(|e| format!("Invalid HTTP proxy URL: {e}"))?
        }
        ProxyType::Https => {
            Proxy::https(proxy_url).map_err(|e| format!("Invalid HTTPS proxy URL: {e}"))?
        }
        ProxyType::Socks5 => {
            let url = if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://") {
                proxy_url.to_string()
            } else {
                format!("socks5://{proxy_url}")
            };

            Proxy::all(&url).map_err(|e| format!("Invalid SOCKS5 proxy URL: {e}"))?
        }
    };

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks_scheme_is_added() {
        let config = ProxyConfig {
            url: "127.0.0.1:1080".to_string(),
            proxy_type: ProxyType::Socks5,
            auth: None,
        };
        assert!(build_proxy_from_config(&config).is_ok());
        assert_eq!(config.ffmpeg_url(), None);
    }

    #[test]
    fn auth_is_redacted_in_debug() {
        let auth = ProxyAuth {
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("u"));
        assert!(!rendered.contains("hunter2"));
    }
}
