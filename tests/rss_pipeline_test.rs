//! Feed pipeline end-to-end against a fake origin: fetch in auto mode,
//! parse, junk-filter, and verify the boundary behaviors (empty feed,
//! malformed feed) never surface errors to the job layer.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portsight_backend::fetch::Fetcher;
use portsight_backend::rss::RssClient;

const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test Wire</title>
    <item>
      <title>Fed signals patience on rates</title>
      <link>https://wire.example/fed</link>
      <description>Officials emphasized steady earnings growth and resilient markets, noting analyst forecasts for the next quarter remain broadly unchanged.</description>
      <pubDate>Thu, 05 Jun 2025 09:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Limited time offer on trading courses</title>
      <link>https://spam.example/course</link>
      <description>Sign up now and click here for exclusive access to our advertisement supported premium newsletter full of winning stock picks.</description>
    </item>
  </channel>
</rss>"#;

fn client() -> RssClient {
    RssClient::new(Fetcher::new(None))
}

#[tokio::test]
async fn fetches_and_filters_feed() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(FEED, "application/rss+xml"))
        .mount(&origin)
        .await;

    let result = client().fetch_feed(&format!("{}/rss", origin.uri())).await;

    assert_eq!(result.total_items, 2);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.junk_filtered, 1);
    assert_eq!(result.items[0].title, "Fed signals patience on rates");
    assert_eq!(result.title.as_deref(), Some("Test Wire"));
}

#[tokio::test]
async fn unreachable_feed_yields_empty_result() {
    // Nothing is listening on this port
    let result = client().fetch_feed("http://127.0.0.1:1/rss").await;
    assert!(result.items.is_empty());
    assert_eq!(result.total_items, 0);
}

#[tokio::test]
async fn malformed_feed_yields_empty_result() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not xml feed</html>"))
        .mount(&origin)
        .await;

    let result = client().fetch_feed(&format!("{}/rss", origin.uri())).await;
    assert!(result.items.is_empty());
}

#[tokio::test]
async fn http_error_feed_yields_empty_result() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&origin)
        .await;

    let result = client().fetch_feed(&format!("{}/rss", origin.uri())).await;
    assert!(result.items.is_empty());
}
