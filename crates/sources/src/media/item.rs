use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::filename::{image_extension, sanitize_filename};
use super::{MediaStatus, Post, TransitionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Gif,
    Video,
    Thumbnail,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Gif => "gif",
            Self::Video => "video",
            Self::Thumbnail => "thumbnail",
        }
    }

    /// Whether the item is a still image.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Photo | Self::Thumbnail)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable unit of an account.
#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    pub url: String,
    #[serde(skip)]
    pub post: Arc<Post>,
    status: MediaStatus,
    attempts: u32,
}

impl MediaItem {
    pub fn new(kind: MediaKind, index: Option<usize>, url: &str, post: &Arc<Post>) -> Self {
        let id = match index {
            Some(i) => format!("{}_{}_{}", post.id, kind, i),
            None => format!("{}_{}", post.id, kind),
        };
        Self {
            id,
            kind,
            url: url.to_string(),
            post: Arc::clone(post),
            status: MediaStatus::Pending,
            attempts: 0,
        }
    }

    pub fn status(&self) -> MediaStatus {
        self.status
    }

    /// Number of times the item entered `InProgress`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn transition(&mut self, target: MediaStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(target)?;
        if target == MediaStatus::InProgress {
            self.attempts += 1;
        }
        Ok(())
    }

    /// Default output extension for the item.
    ///
    /// Images keep the extension named by their URL when it is a known image
    /// type; GIFs are served as MP4 and videos are muxed to MP4.
    pub fn default_extension(&self) -> String {
        match self.kind {
            MediaKind::Photo | MediaKind::Thumbnail => {
                image_extension(&self.url).unwrap_or_else(|| "jpg".to_string())
            }
            MediaKind::Gif | MediaKind::Video => "mp4".to_string(),
        }
    }

    /// Sanitized file stem shared by every output of the item.
    pub fn file_stem(&self) -> String {
        sanitize_filename(&self.id)
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.file_stem(), extension)
    }
}
