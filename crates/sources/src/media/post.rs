use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MediaItem, MediaKind};

/// A single timeline entry and the media attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub link: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub text_html: String,
    pub text_plain: String,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub gif_urls: Vec<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_thumbnail_url: Option<String>,
}

impl Post {
    pub fn has_media(&self) -> bool {
        !self.photo_urls.is_empty() || !self.gif_urls.is_empty() || self.video_url.is_some()
    }

    /// Expand the post into media items: photos, then GIFs, then video and
    /// its thumbnail.
    ///
    /// Indexed kinds get an `_<index>` suffix, so ids are unique per post.
    pub fn media_items(self: &Arc<Self>) -> Vec<MediaItem> {
        let mut items = Vec::new();

        for (i, url) in self.photo_urls.iter().enumerate() {
            items.push(MediaItem::new(MediaKind::Photo, Some(i), url, self));
        }
        for (i, url) in self.gif_urls.iter().enumerate() {
            items.push(MediaItem::new(MediaKind::Gif, Some(i), url, self));
        }
        if let Some(url) = &self.video_url {
            items.push(MediaItem::new(MediaKind::Video, None, url, self));
            if let Some(thumb) = &self.video_thumbnail_url {
                items.push(MediaItem::new(MediaKind::Thumbnail, None, thumb, self));
            }
        }

        items
    }
}

/// Sidecar written next to the media of a post once something completed.
#[derive(Debug, Serialize)]
pub struct PostSidecar<'a> {
    #[serde(flatten)]
    pub post: &'a Post,
    pub downloaded_at: DateTime<Utc>,
}

impl<'a> PostSidecar<'a> {
    pub fn new(post: &'a Post) -> Self {
        Self {
            post,
            downloaded_at: Utc::now(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_info.json", super::sanitize_filename(&self.post.id))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_post() -> Post {
        Post {
            id: "1587".to_string(),
            link: "https://nitter.example/bob/status/1587#m".to_string(),
            author: "Bob".to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            text_html: "<div>hi</div>".to_string(),
            text_plain: "hi".to_string(),
            photo_urls: vec![
                "https://nitter.example/pic/orig/media%2Fa.jpg".to_string(),
                "https://nitter.example/pic/orig/media%2Fb.png".to_string(),
            ],
            gif_urls: vec!["https://nitter.example/pic/video.twimg.com%2Ftweet_video%2Fg.mp4".to_string()],
            video_url: Some("https://nitter.example/video/enc/abc.m3u8".to_string()),
            video_thumbnail_url: Some("https://nitter.example/pic/thumb.jpg".to_string()),
        }
    }

    #[test]
    fn media_items_are_ordered_and_unique() {
        let post = Arc::new(sample_post());
        let items = post.media_items();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "1587_photo_0",
                "1587_photo_1",
                "1587_gif_0",
                "1587_video",
                "1587_thumbnail"
            ]
        );
    }

    #[test]
    fn thumbnail_without_video_is_ignored() {
        let mut post = sample_post();
        post.video_url = None;
        let items = Arc::new(post).media_items();
        assert!(items.iter().all(|i| i.kind != MediaKind::Thumbnail));
    }

    #[test]
    fn sidecar_contains_post_and_timestamp() {
        let post = sample_post();
        let sidecar = PostSidecar::new(&post);
        assert_eq!(sidecar.file_name(), "1587_info.json");
        let value: serde_json::Value = serde_json::from_str(&sidecar.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], "1587");
        assert_eq!(value["author"], "Bob");
        assert!(value["downloaded_at"].is_string());
    }
}
