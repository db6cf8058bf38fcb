//! Resolver backed by Nitter, an alternative HTML front-end for Twitter.

mod date;
mod instances;
mod page;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

pub use date::{parse_tweet_date, parse_tweet_date_or_epoch};
pub use instances::{
    DEFAULT_AGE_RESTRICTED_INSTANCES, DEFAULT_BAD_INSTANCES, DEFAULT_INSTANCE_LIST_URL,
    InstancePool, parse_us_instances,
};
pub use page::{PageOutcome, TimelinePage, parse_timeline};

use crate::error::SourceError;
use crate::media::MediaItem;
use crate::resolver::{AccountResolver, TimelineSource, normalize_username};
use crate::session::SourceSession;

pub const DEFAULT_DISCOVERY_URL: &str = "https://twiiit.com/twitter";

#[derive(Debug, Clone)]
pub struct NitterConfig {
    /// Fixed instance base URLs. When empty, instances are discovered.
    pub instances: Vec<String>,
    /// Pick from the US-hosted rows of `instance_list_url`. Only those
    /// instances show age-restricted posts.
    pub us_only: bool,
    pub instance_list_url: String,
    /// Endpoint that redirects to a random public instance, used when
    /// `us_only` is off.
    pub discovery_url: Option<String>,
    /// Hosts never used.
    pub bad_instances: Vec<String>,
    /// Hosts skipped in `us_only` mode.
    pub age_restricted_instances: Vec<String>,
    pub source: TimelineSource,
    /// Pages fetched from one instance before switching to another.
    pub pages_per_instance: u32,
    pub switch_delay: Duration,
    /// Consecutive failed page fetches tolerated before giving up.
    pub max_switch_attempts: u32,
    /// Upper bound on fetched pages, 0 for no limit.
    pub max_pages: u32,
    /// Extra cookies, `name=value; name2=value2`.
    pub cookies: Option<String>,
}

impl Default for NitterConfig {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            us_only: true,
            instance_list_url: DEFAULT_INSTANCE_LIST_URL.to_string(),
            discovery_url: Some(DEFAULT_DISCOVERY_URL.to_string()),
            bad_instances: DEFAULT_BAD_INSTANCES.iter().map(|h| h.to_string()).collect(),
            age_restricted_instances: DEFAULT_AGE_RESTRICTED_INSTANCES
                .iter()
                .map(|h| h.to_string())
                .collect(),
            source: TimelineSource::default(),
            pages_per_instance: 3,
            switch_delay: Duration::from_secs(3),
            max_switch_attempts: 10,
            max_pages: 0,
            cookies: None,
        }
    }
}

pub struct NitterResolver {
    session: SourceSession,
    config: NitterConfig,
}

impl NitterResolver {
    pub fn new(client: Client, config: NitterConfig) -> Self {
        let mut session = SourceSession::new(client);
        // Without this preference videos are hidden behind the "enable HLS" form.
        session.add_cookie("hlsPlayback", "on");
        if let Some(cookies) = &config.cookies {
            session.set_cookies_from_string(cookies);
        }
        Self { session, config }
    }

    fn page_url(&self, instance: &Url, username: &str, cursor: &str) -> String {
        format!(
            "{}/{}/{}{}",
            instance.as_str().trim_end_matches('/'),
            username,
            self.config.source.as_path(),
            cursor
        )
    }
}

/// Why a page attempt did not produce a timeline.
enum Attempt {
    /// Try again on another instance.
    Retry(String),
    /// Try again on another instance and never come back to this one.
    Blacklist(&'static str),
}

#[async_trait]
impl AccountResolver for NitterResolver {
    fn name(&self) -> &'static str {
        "nitter"
    }

    async fn resolve(&self, username: &str) -> Result<Vec<MediaItem>, SourceError> {
        let username = normalize_username(username)?;
        let mut pool = InstancePool::new(self.session.clone(), &self.config)?;

        let mut instance: Option<Url> = None;
        let mut pages_on_instance = 0u32;
        let mut failures = 0u32;
        let mut pages = 0u32;
        let mut cursor = String::new();
        let mut cursors = HashSet::new();
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        loop {
            if self.config.max_pages > 0 && pages >= self.config.max_pages {
                debug!(username, pages, "Page limit reached");
                break;
            }
            if failures > self.config.max_switch_attempts {
                return Err(SourceError::unreachable(format!(
                    "giving up after {failures} failed page fetches"
                )));
            }

            let reusable = instance
                .clone()
                .filter(|_| pages_on_instance < self.config.pages_per_instance.max(1));
            let base = match reusable {
                Some(url) => url,
                None => match pool.switch().await {
                    Ok(url) => {
                        instance = Some(url.clone());
                        pages_on_instance = 0;
                        url
                    }
                    // A discovery endpoint may hand out a usable instance next time.
                    Err(e) if pool.uses_discovery() && !matches!(e, SourceError::InvalidUrl(_)) => {
                        warn!(error = %e, "Instance discovery failed");
                        failures += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let url = self.page_url(&base, username, &cursor);
            debug!(url = %url, "Fetching timeline page");

            let attempt = match self.session.get(&url).send().await {
                Err(e) => Attempt::Retry(e.to_string()),
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(SourceError::not_found(username, "timeline returned 404"));
                }
                Ok(response) if !response.status().is_success() => {
                    Attempt::Retry(format!("HTTP {}", response.status()))
                }
                Ok(response) => match response.text().await {
                    Err(e) => Attempt::Retry(e.to_string()),
                    Ok(body) => match parse_timeline(&body, &base, self.config.source) {
                        PageOutcome::AccountUnavailable(reason) => {
                            return Err(SourceError::not_found(username, reason));
                        }
                        PageOutcome::HlsDisabled => Attempt::Blacklist("HLS playback disabled"),
                        PageOutcome::Malformed => Attempt::Blacklist("unparseable timeline page"),
                        PageOutcome::Timeline(page) => {
                            failures = 0;
                            pages += 1;
                            pages_on_instance += 1;

                            let exhausted = page.posts.is_empty() && page.skipped == 0;
                            debug!(
                                username,
                                page = pages,
                                posts = page.posts.len(),
                                skipped = page.skipped,
                                "Parsed timeline page"
                            );
                            for post in page.posts {
                                let post = Arc::new(post);
                                for item in post.media_items() {
                                    if seen.insert(item.id.clone()) {
                                        items.push(item);
                                    }
                                }
                            }

                            match page.cursor {
                                Some(next) if !exhausted => {
                                    if !cursors.insert(next.clone()) {
                                        warn!(username, cursor = %next, "Timeline cursor repeated, stopping");
                                        break;
                                    }
                                    cursor = next;
                                }
                                _ => break,
                            }
                            continue;
                        }
                    },
                },
            };

            failures += 1;
            instance = None;
            match attempt {
                Attempt::Retry(reason) => {
                    warn!(instance = %base, reason = %reason, "Page fetch failed, switching instance");
                }
                Attempt::Blacklist(reason) => pool.mark_bad(&base, reason),
            }
        }

        info!(username, items = items.len(), pages, "Resolved account");
        Ok(items)
    }
}
