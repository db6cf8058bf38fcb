use std::collections::BTreeMap;
use std::str::FromStr;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use tracing::debug;

/// Browser user agent presented to HTML front-ends.
pub const DEFAULT_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:103.0) Gecko/20100101 Firefox/103.0";

/// HTTP session used by resolvers.
///
/// Holds the headers and cookies that are attached to every request so
/// callers only deal with URLs.
#[derive(Debug, Clone)]
pub struct SourceSession {
    client: Client,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
}

impl SourceSession {
    pub fn new(client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_UA),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );

        Self {
            client,
            headers,
            cookies: BTreeMap::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Insert an arbitrary header. Invalid names or values are skipped.
    pub fn add_header(&mut self, key: &str, value: &str) {
        match (HeaderName::from_str(key), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => debug!(header = key, "Skipping invalid header"),
        }
    }

    pub fn add_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Set cookies from a cookie string (`name1=value1; name2=value2`).
    pub fn set_cookies_from_string(&mut self, cookie_string: &str) {
        for part in cookie_string.split(&[';', '\n'][..]).map(str::trim) {
            let Some((name, value)) = part.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() || value.is_empty() {
                continue;
            }
            self.cookies.insert(name.to_owned(), value.to_owned());
        }
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    fn build_cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a request with the session headers and cookies applied.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut headers = self.headers.clone();

        if let Some(cookie_header) = self.build_cookie_header() {
            match HeaderValue::from_str(&cookie_header) {
                Ok(value) => {
                    headers.insert(reqwest::header::COOKIE, value);
                }
                Err(e) => debug!(error = %e, "Failed to build Cookie header"),
            }
        }

        self.client.request(method, url).headers(headers)
    }
}
