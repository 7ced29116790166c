// tests/feed_adapter.rs
//
// Feed adapter against a local HTTP server: lookback window, per-source cap,
// relevance filter, and the failure modes that must degrade to "no items".

use axum::{http::StatusCode, routing::get, Router};
use chrono::{Duration, TimeZone, Utc};

use brand_pulse::ingest::providers::feed::FeedAdapter;
use brand_pulse::ingest::types::{ContentSource, ImageOrigin, SourceKind};
use brand_pulse::relevance::RelevanceHandle;

fn rss_item(title: &str, link: &str, date: &str) -> String {
    format!(
        "<item><title>{title}</title><link>{link}</link><pubDate>{date}</pubDate>\
         <description><![CDATA[<p>{title}</p><img src=\"https://cdn.toys.test/{n}.jpg\">]]></description></item>",
        n = link.rsplit('/').next().unwrap_or("x"),
    )
}

fn rss(items: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>t</title>{}</channel></rss>",
        items.concat()
    )
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn relevance() -> RelevanceHandle {
    RelevanceHandle::from_keywords(["labubu", "泡泡玛特"])
}

#[tokio::test]
async fn keeps_recent_relevant_entries_up_to_the_cap() {
    let body = rss(&[
        rss_item("Labubu wave 3 revealed", "https://toys.test/a", "Mon, 30 Jun 2025 08:00:00 +0000"),
        rss_item("泡泡玛特 opens in Milan", "https://toys.test/b", "Sun, 29 Jun 2025 08:00:00 +0000"),
        rss_item("Labubu in Seoul", "https://toys.test/c", "Sat, 28 Jun 2025 08:00:00 +0000"),
        rss_item("Unrelated plush news", "https://toys.test/d", "Mon, 30 Jun 2025 09:00:00 +0000"),
        rss_item("Labubu archive piece", "https://toys.test/e", "Sun, 01 Jun 2025 08:00:00 +0000"),
    ]);
    let base = serve(Router::new().route("/feed", get(move || async move { body }))).await;

    let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap();
    let adapter = FeedAdapter::new(client(), relevance()).with_lookback_days(7);
    let mut source = ContentSource::new("Toy News", SourceKind::Feed).with_url(format!("{base}/feed"));
    source.max_items = Some(2);

    let items = adapter.fetch_at(&source, now).await;
    let urls: Vec<_> = items.iter().map(|i| i.canonical_url.as_str()).collect();
    assert_eq!(urls, vec!["https://toys.test/a", "https://toys.test/b"]);
    assert_eq!(items[0].images[0].origin, ImageOrigin::Inline);
    assert_eq!(items[0].images[0].url, "https://cdn.toys.test/a.jpg");

    // without the cap the third recent entry appears, the archived one never does
    source.max_items = None;
    let items = adapter.fetch_at(&source, now).await;
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.published_at >= now - Duration::days(7)));
}

#[tokio::test]
async fn atom_entries_are_read_too() {
    let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Collectors</title>
  <entry>
    <title>Labubu meetup recap</title>
    <link rel="alternate" href="https://collectors.test/meetup"/>
    <updated>2025-06-30T07:00:00Z</updated>
    <author><name>Mina</name></author>
    <summary>Fans traded rare figures all afternoon.</summary>
  </entry>
</feed>"#;
    let base = serve(Router::new().route("/atom", get(move || async move { body }))).await;

    let now = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap();
    let adapter = FeedAdapter::new(client(), relevance());
    let source = ContentSource::new("Collectors", SourceKind::Feed).with_url(format!("{base}/atom"));

    let items = adapter.fetch_at(&source, now).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].canonical_url, "https://collectors.test/meetup");
    assert_eq!(items[0].author.as_deref(), Some("Mina"));
    assert_eq!(
        items[0].published_at,
        Utc.with_ymd_and_hms(2025, 6, 30, 7, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn failures_degrade_to_no_items() {
    let app = Router::new()
        .route("/down", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
        .route("/garbage", get(|| async { "this is not xml at all" }));
    let base = serve(app).await;
    let adapter = FeedAdapter::new(client(), relevance());
    let now = Utc::now();

    for path in ["down", "garbage"] {
        let source = ContentSource::new(path, SourceKind::Feed).with_url(format!("{base}/{path}"));
        assert!(adapter.fetch_at(&source, now).await.is_empty(), "{path}");
    }

    // nothing listens on port 9 locally
    let unreachable = ContentSource::new("gone", SourceKind::Feed).with_url("http://127.0.0.1:9/feed");
    assert!(adapter.fetch_at(&unreachable, now).await.is_empty());

    let no_url = ContentSource::new("no url", SourceKind::Feed);
    assert!(adapter.fetch_at(&no_url, now).await.is_empty());
}

#[tokio::test]
async fn slow_feed_is_cut_off_by_the_request_timeout() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            rss(&[])
        }),
    );
    let base = serve(app).await;
    let adapter = FeedAdapter::new(client(), relevance())
        .with_timeout(std::time::Duration::from_millis(200));
    let source = ContentSource::new("slow", SourceKind::Feed).with_url(format!("{base}/slow"));

    let started = std::time::Instant::now();
    assert!(adapter.fetch_at(&source, Utc::now()).await.is_empty());
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}
