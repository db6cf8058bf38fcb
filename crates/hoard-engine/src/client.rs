use reqwest::Client;
use reqwest::redirect::{Attempt, Policy};
use tracing::debug;
use url::Url;

use crate::config::{DownloaderConfig, ProtocolAllowList};
use crate::error::DownloadError;
use crate::proxy::build_proxy_from_config;

const MAX_REDIRECTS: usize = 10;

fn redirect_policy(allowed: ProtocolAllowList) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !allowed.allows(attempt.url().scheme()) {
            let scheme = attempt.url().scheme().to_string();
            attempt.error(format!("redirect to disallowed protocol `{scheme}`"))
        } else {
            attempt.follow()
        }
    })
}

/// Build the HTTP client shared by the manifest fetcher and the downloader.
pub fn build_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .redirect(redirect_policy(config.allowed_protocols.clone()));

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        debug!(url = %proxy_config.url, kind = ?proxy_config.proxy_type, "Using proxy");
        let proxy =
            build_proxy_from_config(proxy_config).map_err(DownloadError::proxy_configuration)?;
        builder = builder.proxy(proxy);
    } else if !config.use_system_proxy {
        builder = builder.no_proxy();
    }

    Ok(builder.build()?)
}

/// Parse `raw` and make sure its scheme is allowed.
pub fn checked_url(raw: &str, allowed: &ProtocolAllowList) -> Result<Url, DownloadError> {
    let url = Url::parse(raw).map_err(|e| DownloadError::invalid_url(raw, e.to_string()))?;
    if !allowed.allows(url.scheme()) {
        return Err(DownloadError::UnsupportedProtocol {
            protocol: url.scheme().to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_url_enforces_allow_list() {
        let allowed = ProtocolAllowList::default();
        assert!(checked_url("https://cdn.example/a.m3u8", &allowed).is_ok());
        assert!(matches!(
            checked_url("file:///etc/passwd", &allowed),
            Err(DownloadError::UnsupportedProtocol { protocol }) if protocol == "file"
        ));
        assert!(matches!(
            checked_url("not a url", &allowed),
            Err(DownloadError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn redirects_to_disallowed_schemes_fail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hop")
            .with_status(302)
            .with_header("location", "ftp://files.example/secret")
            .create_async()
            .await;

        let client = build_client(&DownloaderConfig::default()).unwrap();
        let err = client
            .get(format!("{}/hop", server.url()))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_redirect());
    }

    #[tokio::test]
    async fn allowed_redirects_are_followed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/hop")
            .with_status(302)
            .with_header("location", "/target")
            .create_async()
            .await;
        server
            .mock("GET", "/target")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let client = build_client(&DownloaderConfig::default()).unwrap();
        let resp = client
            .get(format!("{}/hop", server.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
    }
}
