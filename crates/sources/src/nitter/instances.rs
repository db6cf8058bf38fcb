use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use rand::RngExt;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::NitterConfig;
use crate::error::SourceError;
use crate::session::SourceSession;

/// Raw markdown of the public instance table on the Nitter wiki.
pub const DEFAULT_INSTANCE_LIST_URL: &str =
    "https://raw.githubusercontent.com/wiki/zedeus/nitter/Instances.md";

/// Hosts behind Cloudflare, which rewrites `.m3u8` playlists at random, or
/// hosts that are gone.
pub const DEFAULT_BAD_INSTANCES: &[&str] = &[
    "nitter.domain.glass",
    "nitter.winscloud.net",
    "twtr.bch.bar",
    "twitter.dr460nf1r3.org",
    "nitter.garudalinux.org",
    "nitter.rawbit.ninja",
    "nitter.privacytools.io",
    "nitter.sneed.network",
    "n.sneed.network",
    "nitter.d420.de",
    "nitter.caioalonso.com",
];

/// US-hosted instances that still hide age-restricted posts.
pub const DEFAULT_AGE_RESTRICTED_INSTANCES: &[&str] =
    &["birdsite.xanny.family", "tweet.lambda.dance", "nitter.pw"];

/// Wiki table rows whose location column is the US flag or the globe. The
/// variation selector after the emoji is optional.
static US_ROW_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\| *\[([^\]]+)\](?:\(([^)\s]+)\))?.*?\|.+?\|.+?\| *(?:\x{1F1FA}\x{1F1F8}|\x{1F30F})\x{FE0F}? *\|.+$",
    )
    .unwrap()
});

/// Instances from the wiki table that are hosted in the US or worldwide.
///
/// The row's link is used when present, otherwise `https://<name>`.
pub fn parse_us_instances(markdown: &str) -> Vec<Url> {
    US_ROW_REGEX
        .captures_iter(markdown)
        .filter_map(|caps| {
            let raw = match caps.get(2) {
                Some(link) => link.as_str().to_string(),
                None => format!("https://{}", caps[1].trim()),
            };
            parse_base(&raw).ok()
        })
        .collect()
}

/// Picks the Nitter instance the resolver talks to and remembers the ones
/// that misbehaved.
///
/// Instances come from a fixed list, from the US-hosted rows of the wiki
/// instance table, or from a discovery endpoint that redirects to a random
/// public instance.
#[derive(Debug)]
pub struct InstancePool {
    session: SourceSession,
    instances: Vec<Url>,
    discovery_url: Option<Url>,
    instance_list_url: Option<Url>,
    listed: Option<Vec<Url>>,
    switch_delay: Duration,
    bad: HashSet<String>,
    bad_hosts: HashSet<String>,
    age_restricted: HashSet<String>,
    current: Option<Url>,
    switches: u32,
}

fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn parse_base(raw: &str) -> Result<Url, SourceError> {
    let url = Url::parse(raw.trim()).map_err(|e| SourceError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SourceError::InvalidUrl(format!(
            "{raw}: unsupported scheme `{other}`"
        ))),
    }
}

fn host_set(hosts: &[String]) -> HashSet<String> {
    hosts
        .iter()
        .map(|h| h.trim().trim_start_matches("https://").trim_end_matches('/').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

impl InstancePool {
    pub fn new(session: SourceSession, config: &NitterConfig) -> Result<Self, SourceError> {
        let instances = config
            .instances
            .iter()
            .map(|raw| parse_base(raw))
            .collect::<Result<Vec<_>, _>>()?;
        let discovery_url = config.discovery_url.as_deref().map(parse_base).transpose()?;
        let instance_list_url = if config.us_only {
            Some(parse_base(&config.instance_list_url)?)
        } else {
            None
        };

        if instances.is_empty() && discovery_url.is_none() && instance_list_url.is_none() {
            return Err(SourceError::InvalidUrl(
                "no instances and no discovery endpoint configured".to_string(),
            ));
        }

        Ok(Self {
            session,
            instances,
            discovery_url,
            instance_list_url,
            listed: None,
            switch_delay: config.switch_delay,
            bad: HashSet::new(),
            bad_hosts: host_set(&config.bad_instances),
            age_restricted: host_set(&config.age_restricted_instances),
            current: None,
            switches: 0,
        })
    }

    /// Whether instances are obtained by discovery rather than a fixed list.
    pub fn uses_discovery(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn is_bad(&self, url: &Url) -> bool {
        self.bad.contains(&origin_key(url))
            || url.host_str().is_some_and(|host| self.bad_hosts.contains(host))
    }

    fn is_age_restricted(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| self.age_restricted.contains(host))
    }

    pub fn mark_bad(&mut self, url: &Url, reason: &str) {
        warn!(instance = %url, reason, "Marking instance as bad");
        self.bad.insert(origin_key(url));
        if self.current.as_ref().is_some_and(|c| origin_key(c) == origin_key(url)) {
            self.current = None;
        }
    }

    /// Move to another instance, sleeping `switch_delay` first unless this is
    /// the first pick.
    ///
    /// With a fixed list, [`SourceError::Unreachable`] means every instance is
    /// marked bad. Discovery failures are transient and a later call may
    /// succeed.
    pub async fn switch(&mut self) -> Result<Url, SourceError> {
        if self.switches > 0 && !self.switch_delay.is_zero() {
            debug!(delay = ?self.switch_delay, "Waiting before switching instance");
            tokio::time::sleep(self.switch_delay).await;
        }
        self.switches += 1;

        let next = if !self.instances.is_empty() {
            self.pick_static()?
        } else if self.instance_list_url.is_some() {
            self.pick_listed().await?
        } else {
            self.discover().await?
        };

        info!(
            instance = %next,
            previous = self.current.as_ref().map(Url::as_str).unwrap_or("none"),
            switch = self.switches,
            "Using instance"
        );
        self.current = Some(next.clone());
        Ok(next)
    }

    fn pick_static(&self) -> Result<Url, SourceError> {
        let usable: Vec<&Url> = self.instances.iter().filter(|u| !self.is_bad(u)).collect();
        if usable.is_empty() {
            return Err(SourceError::unreachable("every configured instance is marked bad"));
        }

        // Prefer a different instance than the current one when possible.
        let fresh: Vec<&Url> = usable
            .iter()
            .copied()
            .filter(|u| self.current.as_ref() != Some(*u))
            .collect();
        let pool = if fresh.is_empty() { usable } else { fresh };
        let idx = rand::rng().random_range(0..pool.len());
        Ok(pool[idx].clone())
    }

    /// Random US-hosted instance from the wiki table, checked to answer
    /// before it is handed out. The table is fetched once per pool.
    async fn pick_listed(&mut self) -> Result<Url, SourceError> {
        if self.listed.is_none() {
            let listed = self.fetch_listed().await?;
            info!(instances = listed.len(), "Loaded US-hosted instance list");
            self.listed = Some(listed);
        }

        let candidates: Vec<&Url> = self
            .listed
            .iter()
            .flatten()
            .filter(|u| !self.is_bad(u) && !self.is_age_restricted(u))
            .collect();
        if candidates.is_empty() {
            return Err(SourceError::unreachable(
                "no usable US-hosted instance in the instance list",
            ));
        }
        let picked = candidates[rand::rng().random_range(0..candidates.len())].clone();

        let probe = picked
            .join("twitter")
            .map_err(|e| SourceError::InvalidUrl(format!("{picked}: {e}")))?;
        let response = self.session.get(probe.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::unreachable(format!(
                "instance {} answered HTTP {}",
                origin_key(&picked),
                response.status()
            )));
        }
        Ok(picked)
    }

    async fn fetch_listed(&self) -> Result<Vec<Url>, SourceError> {
        let Some(list_url) = &self.instance_list_url else {
            return Err(SourceError::unreachable("no instance list configured"));
        };
        let response = self.session.get(list_url.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::unreachable(format!(
                "instance list {list_url} answered HTTP {}",
                response.status()
            )));
        }
        Ok(parse_us_instances(&response.text().await?))
    }

    async fn discover(&self) -> Result<Url, SourceError> {
        let Some(endpoint) = &self.discovery_url else {
            return Err(SourceError::unreachable("no discovery endpoint configured"));
        };

        let response = self.session.get(endpoint.as_str()).send().await?;
        let landed = response.url().clone();
        debug!(endpoint = %endpoint, landed = %landed, "Discovery redirect resolved");

        if origin_key(&landed) == origin_key(endpoint) {
            return Err(SourceError::unreachable(format!(
                "discovery endpoint {endpoint} did not redirect to an instance"
            )));
        }
        if self.is_bad(&landed) {
            return Err(SourceError::unreachable(format!(
                "discovery returned bad instance {}",
                origin_key(&landed)
            )));
        }

        parse_base(&origin_key(&landed))
    }
}
