//! Nitter timeline page parsing.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::date::parse_tweet_date_or_epoch;
use crate::media::Post;
use crate::resolver::TimelineSource;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

selector!(ERROR_PANEL, "div.error-panel");
selector!(HLS_FORM, r#"div.video-overlay > form[action="/enablehls"]"#);
selector!(TIMELINE, "div.timeline");
selector!(TWEETS, "div.timeline div.timeline-item:not(.show-more)");
selector!(CURSOR, "div.timeline-item + div.show-more > a[href]");
selector!(CURSOR_FALLBACK, "div.show-more:not(.timeline-item) > a[href]");
selector!(RETWEET_HEADER, "div.retweet-header");
selector!(TWEET_LINK, "a.tweet-link[href]");
selector!(FULLNAME, "a.fullname");
selector!(TWEET_DATE, ".tweet-date > a[title]");
selector!(TWEET_CONTENT, "div.tweet-content");
selector!(ATTACHMENTS, "div.attachments");
selector!(PHOTO, "a.still-image[href]");
selector!(GIF_SOURCE, "video.gif source[src]");
selector!(VIDEO, ".video-container > video");
selector!(SOURCE, "source[src]");

/// What a fetched timeline page turned out to be.
#[derive(Debug)]
pub enum PageOutcome {
    Timeline(TimelinePage),
    /// The front-end reported the account as unavailable.
    AccountUnavailable(String),
    /// The instance serves videos only behind the "enable HLS" form.
    HlsDisabled,
    /// No timeline could be found in the document.
    Malformed,
}

#[derive(Debug, Default)]
pub struct TimelinePage {
    pub posts: Vec<Post>,
    pub cursor: Option<String>,
    /// Entries skipped because they were retweets or had no usable link.
    pub skipped: usize,
}

/// Parse one timeline page served by `instance`.
pub fn parse_timeline(html: &str, instance: &Url, source: TimelineSource) -> PageOutcome {
    let document = Html::parse_document(html);

    if let Some(panel) = document.select(&ERROR_PANEL).next() {
        return PageOutcome::AccountUnavailable(collect_text(&panel));
    }
    if document.select(&HLS_FORM).next().is_some() {
        return PageOutcome::HlsDisabled;
    }
    if document.select(&TIMELINE).next().is_none() {
        return PageOutcome::Malformed;
    }

    let mut page = TimelinePage::default();
    for tweet in document.select(&TWEETS) {
        if source == TimelineSource::Search && tweet.select(&RETWEET_HEADER).next().is_some() {
            page.skipped += 1;
            continue;
        }
        match parse_tweet(&tweet, instance) {
            Some(post) => page.posts.push(post),
            None => page.skipped += 1,
        }
    }

    page.cursor = document
        .select(&CURSOR)
        .next()
        .or_else(|| document.select(&CURSOR_FALLBACK).next())
        .and_then(|a| a.value().attr("href"))
        .map(ToOwned::to_owned);

    PageOutcome::Timeline(page)
}

fn parse_tweet(tweet: &ElementRef<'_>, instance: &Url) -> Option<Post> {
    let href = tweet
        .select(&TWEET_LINK)
        .find(|e| !inside_quote(e))?
        .value()
        .attr("href")?;
    let link = absolute(instance, href)?;
    let id = status_id(href)?;

    let author = first_outside_quote(tweet, &FULLNAME)
        .map(|e| collect_text(&e))
        .unwrap_or_default();
    let timestamp = first_outside_quote(tweet, &TWEET_DATE)
        .and_then(|e| e.value().attr("title"))
        .map(parse_tweet_date_or_epoch)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);
    let (text_html, text_plain) = first_outside_quote(tweet, &TWEET_CONTENT)
        .map(|e| (e.html(), collect_text(&e)))
        .unwrap_or_default();

    let mut post = Post {
        id,
        link,
        author,
        timestamp,
        text_html,
        text_plain,
        photo_urls: Vec::new(),
        gif_urls: Vec::new(),
        video_url: None,
        video_thumbnail_url: None,
    };

    if let Some(attachments) = first_outside_quote(tweet, &ATTACHMENTS) {
        post.photo_urls = attachments
            .select(&PHOTO)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|h| absolute(instance, h))
            .collect();
        post.gif_urls = attachments
            .select(&GIF_SOURCE)
            .filter_map(|s| s.value().attr("src"))
            .filter_map(|s| absolute(instance, s))
            .collect();
        if let Some(video) = attachments.select(&VIDEO).next() {
            let video_url = video
                .value()
                .attr("data-url")
                .or_else(|| {
                    video
                        .select(&SOURCE)
                        .next()
                        .and_then(|s| s.value().attr("src"))
                })
                .and_then(|u| absolute(instance, u));
            if video_url.is_some() {
                post.video_thumbnail_url = video
                    .value()
                    .attr("poster")
                    .and_then(|p| absolute(instance, p));
            }
            post.video_url = video_url;
        }
    }

    Some(post)
}

fn first_outside_quote<'a>(tweet: &ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    tweet.select(selector).find(|e| !inside_quote(e))
}

/// Quoted tweets are rendered inside the quoting tweet; their media belongs
/// to another post.
fn inside_quote(element: &ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        ElementRef::wrap(node).is_some_and(|e| e.value().classes().any(|c| c == "quote"))
    })
}

fn collect_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn absolute(instance: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    instance.join(href).ok().map(String::from)
}

/// Extract the numeric status id from `/user/status/123#m`.
fn status_id(href: &str) -> Option<String> {
    let path = href.split(['#', '?']).next()?;
    let (_, rest) = path.split_once("/status/")?;
    let id: String = rest.chars().take_while(char::is_ascii_digit).collect();
    (!id.is_empty()).then_some(id)
}
