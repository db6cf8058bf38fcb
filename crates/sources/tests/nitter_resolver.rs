use std::time::Duration;

use hoard_sources::{
    AccountResolver, MediaKind, NitterConfig, NitterResolver, SourceError, TimelineSource,
};
use mockito::Server;

fn tweet(id: &str, attachments: &str) -> String {
    format!(
        r#"<div class="timeline-item">
  <a class="tweet-link" href="/user/status/{id}#m"></a>
  <div class="tweet-body">
    <a class="fullname" href="/user">User</a>
    <span class="tweet-date"><a title="Nov 1, 2022 · 4:34 PM UTC">Nov 1</a></span>
    <div class="tweet-content media-body">post {id}</div>
    <div class="attachments">{attachments}</div>
  </div>
</div>"#
    )
}

fn photo(name: &str) -> String {
    format!(r#"<a class="still-image" href="/pic/orig/media%2F{name}.jpg"></a>"#)
}

fn video(name: &str) -> String {
    format!(
        r#"<div class="video-container"><video poster="/pic/{name}.jpg" data-url="/video/{name}.m3u8"></video></div>"#
    )
}

fn page(items: &[String], cursor: Option<&str>) -> String {
    let more = cursor
        .map(|c| format!(r#"<div class="show-more"><a href="{c}">Load more</a></div>"#))
        .unwrap_or_default();
    let body = if items.is_empty() {
        r#"<div class="timeline-none"><h2>No items found</h2></div>"#.to_string()
    } else {
        items.join("\n")
    };
    format!(
        r#"<html><body><div class="timeline">
<div class="timeline-item show-more"><a href="?top">Load newest</a></div>
{body}
{more}
</div></body></html>"#
    )
}

fn config(instances: &[&str]) -> NitterConfig {
    NitterConfig {
        instances: instances.iter().map(|s| s.to_string()).collect(),
        discovery_url: None,
        source: TimelineSource::Search,
        pages_per_instance: 3,
        switch_delay: Duration::ZERO,
        max_switch_attempts: 2,
        max_pages: 0,
        ..NitterConfig::default()
    }
}

fn resolver(cfg: NitterConfig) -> NitterResolver {
    NitterResolver::new(reqwest::Client::new(), cfg)
}

#[tokio::test]
async fn account_without_media_resolves_to_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/alice/search")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(page(&[], None))
        .create_async()
        .await;

    let items = resolver(config(&[&server.url()]))
        .resolve("alice")
        .await
        .unwrap();
    assert!(items.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_account_is_not_found() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/ghost/search")
        .with_status(404)
        .with_body(r#"<div class="error-panel"><span>User "ghost" not found</span></div>"#)
        .create_async()
        .await;

    let err = resolver(config(&[&server.url()]))
        .resolve("ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn protected_account_is_not_found() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/locked/search")
        .with_status(200)
        .with_body(r#"<div class="error-panel"><span>This account's tweets are protected</span></div>"#)
        .create_async()
        .await;

    let err = resolver(config(&[&server.url()]))
        .resolve("locked")
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::NotFound { .. }));
}

#[tokio::test]
async fn pages_are_followed_and_duplicates_dropped() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/carol/search")
        .with_status(200)
        .with_body(page(
            &[tweet("3", &photo("c")), tweet("2", &(photo("a") + &photo("b")))],
            Some("?cursor=P2"),
        ))
        .create_async()
        .await;
    let second = server
        .mock("GET", "/carol/search?cursor=P2")
        .with_status(200)
        .with_body(page(&[tweet("2", &photo("a")), tweet("1", &video("v"))], None))
        .create_async()
        .await;

    let items = resolver(config(&[&server.url()]))
        .resolve("@carol")
        .await
        .unwrap();

    let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(
        ids,
        ["3_photo_0", "2_photo_0", "2_photo_1", "1_video", "1_thumbnail"]
    );
    assert_eq!(items[3].kind, MediaKind::Video);
    assert_eq!(items[3].url, format!("{}/video/v.m3u8", server.url()));
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn page_limit_stops_crawling() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/dave/media")
        .with_status(200)
        .with_body(page(&[tweet("9", &photo("x"))], Some("?cursor=MORE")))
        .create_async()
        .await;
    let next = server
        .mock("GET", "/dave/media?cursor=MORE")
        .expect(0)
        .create_async()
        .await;

    let mut cfg = config(&[&server.url()]);
    cfg.source = TimelineSource::Media;
    cfg.max_pages = 1;
    let items = resolver(cfg).resolve("dave").await.unwrap();
    assert_eq!(items.len(), 1);
    next.assert_async().await;
}

#[tokio::test]
async fn repeated_cursor_ends_pagination() {
    let mut server = Server::new_async().await;
    let body = page(&[tweet("4", &photo("d"))], Some("?cursor=SAME"));
    server
        .mock("GET", "/erin/search")
        .with_status(200)
        .with_body(&body)
        .create_async()
        .await;
    let repeated = server
        .mock("GET", "/erin/search?cursor=SAME")
        .with_status(200)
        .with_body(&body)
        .expect(1)
        .create_async()
        .await;

    let items = tokio::time::timeout(
        Duration::from_secs(5),
        resolver(config(&[&server.url()])).resolve("erin"),
    )
    .await
    .expect("resolver should stop on a repeated cursor")
    .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "4_photo_0");
    repeated.assert_async().await;
}

#[tokio::test]
async fn hls_disabled_instance_is_abandoned() {
    let mut broken = Server::new_async().await;
    broken
        .mock("GET", "/erin/search")
        .with_status(200)
        .with_body(
            r#"<div class="timeline"><div class="timeline-item">
            <div class="video-overlay"><form action="/enablehls"></form></div></div></div>"#,
        )
        .expect_at_most(1)
        .create_async()
        .await;

    let mut healthy = Server::new_async().await;
    let good = healthy
        .mock("GET", "/erin/search")
        .with_status(200)
        .with_body(page(&[tweet("5", &video("clip"))], None))
        .create_async()
        .await;

    let items = resolver(config(&[&broken.url(), &healthy.url()]))
        .resolve("erin")
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    good.assert_async().await;
}

#[tokio::test]
async fn unparseable_only_instance_is_unreachable() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/frank/search")
        .with_status(200)
        .with_body("<html><body>Instance has been rate limited.</body></html>")
        .expect(1)
        .create_async()
        .await;

    let err = resolver(config(&[&server.url()]))
        .resolve("frank")
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Unreachable { .. }), "{err:?}");
}

#[tokio::test]
async fn server_errors_are_bounded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/gina/search")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let err = resolver(config(&[&server.url()]))
        .resolve("gina")
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Unreachable { .. }), "{err:?}");
    mock.assert_async().await;
}

#[tokio::test]
async fn invalid_username_is_rejected_without_requests() {
    let err = resolver(config(&["http://127.0.0.1:9"]))
        .resolve("bad/name")
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidUsername(_)));
}
