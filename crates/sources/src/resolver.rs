use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::media::MediaItem;

/// Which timeline of an account is crawled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineSource {
    /// The account's media tab.
    Media,
    /// The account's search tab; retweets are skipped.
    #[default]
    Search,
}

impl TimelineSource {
    pub fn as_path(&self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Search => "search",
        }
    }
}

impl FromStr for TimelineSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "media" => Ok(Self::Media),
            "search" => Ok(Self::Search),
            other => Err(format!("unknown timeline source `{other}`")),
        }
    }
}

impl std::fmt::Display for TimelineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Turns a username into the media items posted by that account.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Enumerate the account's media items in timeline order.
    ///
    /// Fails with [`SourceError::NotFound`] when the account does not exist
    /// or cannot be viewed. An existing account without media yields an empty
    /// vector.
    async fn resolve(&self, username: &str) -> Result<Vec<MediaItem>, SourceError>;
}

/// Normalise a username: an optional leading `@` is dropped and only ASCII
/// letters, digits and `_` are accepted.
pub fn normalize_username(username: &str) -> Result<&str, SourceError> {
    let name = username.trim();
    let name = name.strip_prefix('@').unwrap_or(name);
    let valid = !name.is_empty()
        && name.len() <= 50
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(SourceError::InvalidUsername(username.to_string()))
    }
}
