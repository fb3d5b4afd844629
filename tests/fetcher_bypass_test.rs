//! End-to-end fetcher behavior against fake origins and a fake challenge
//! solver: bypassed feed fetches must be byte-identical to direct ones,
//! and failures must fall back the way the mode contract promises.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portsight_backend::fetch::{FetchError, FetchMode, Fetcher, FlareSolverrClient};
use portsight_backend::rss::parse_feed;

const FEED_XML: &str = "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>Wire</title><item><title>Apple reports Q3 earnings beat</title><link>https://wire.example/apple</link><description>Revenue grew 12% and EPS beat analyst estimates, with shares higher in after-hours trading on the Nasdaq exchange following the report.</description><pubDate>Thu, 05 Jun 2025 14:30:00 +0000</pubDate></item></channel></rss>";

/// Wrap feed bytes the way a headless browser renders an XML document.
fn browser_wrapped(xml: &str) -> String {
    let escaped = xml
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<html><head></head><body><pre>{escaped}</pre></body></html>")
}

async fn start_origin() -> MockServer {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(FEED_XML, "application/rss+xml"),
        )
        .mount(&origin)
        .await;
    origin
}

async fn start_solver_wrapping_feed() -> MockServer {
    let solver = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "solution": {
                "status": 200,
                "response": browser_wrapped(FEED_XML),
                "headers": {"content-type": "text/html; charset=utf-8"}
            }
        })))
        .mount(&solver)
        .await;
    solver
}

#[tokio::test]
async fn bypassed_feed_fetch_is_byte_identical_to_direct() {
    let origin = start_origin().await;
    let solver = start_solver_wrapping_feed().await;

    let url = format!("{}/feed.xml", origin.uri());

    let direct = Fetcher::new(None)
        .fetch(&url, FetchMode::Direct)
        .await
        .expect("direct fetch");

    let bypass = Fetcher::new(Some(FlareSolverrClient::new(solver.uri())))
        .fetch(&url, FetchMode::Bypass)
        .await
        .expect("bypass fetch");

    assert_eq!(direct, bypass, "bypass must unwrap to the original feed bytes");
    assert!(bypass.starts_with(b"<?xml"));
    assert!(bypass.ends_with(b"</rss>"));

    // And the parser sees the same items either way
    let parsed = parse_feed(&bypass, &url);
    assert_eq!(parsed.items.len(), 1);
    assert_eq!(parsed.items[0].title, "Apple reports Q3 earnings beat");
}

#[tokio::test]
async fn auto_mode_falls_back_to_direct_when_solver_errors() {
    let origin = start_origin().await;
    let solver = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "message": "challenge not solved"
        })))
        .mount(&solver)
        .await;

    let fetcher = Fetcher::new(Some(FlareSolverrClient::new(solver.uri())));
    let url = format!("{}/feed.xml", origin.uri());

    let bytes = fetcher
        .fetch(&url, FetchMode::Auto)
        .await
        .expect("auto fetch should fall back to direct");
    assert_eq!(bytes, FEED_XML.as_bytes());
}

#[tokio::test]
async fn bypass_mode_falls_back_when_solver_unconfigured() {
    let origin = start_origin().await;
    let fetcher = Fetcher::new(None);
    let url = format!("{}/feed.xml", origin.uri());

    let bytes = fetcher
        .fetch(&url, FetchMode::Bypass)
        .await
        .expect("unconfigured solver should mean a direct fallback");
    assert_eq!(bytes, FEED_XML.as_bytes());
}

#[tokio::test]
async fn direct_retries_retryable_status_then_succeeds() {
    let origin = MockServer::start().await;

    // Two 503s, then the payload
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&origin)
        .await;

    let fetcher = Fetcher::new(None);
    let bytes = fetcher
        .fetch(&format!("{}/flaky", origin.uri()), FetchMode::Direct)
        .await
        .expect("retry should recover");
    assert_eq!(bytes, b"recovered");
}

#[tokio::test]
async fn direct_surfaces_non_retryable_status() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;

    let fetcher = Fetcher::new(None);
    let err = fetcher
        .fetch(&format!("{}/gone", origin.uri()), FetchMode::Direct)
        .await
        .expect_err("404 is not retryable");
    match err {
        FetchError::HttpStatus(404) => {}
        other => panic!("expected HttpStatus(404), got {other:?}"),
    }
}

#[tokio::test]
async fn bypass_surfaces_origin_error_status() {
    let solver = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "solution": {"status": 403, "response": "denied", "headers": {}}
        })))
        .mount(&solver)
        .await;

    let fetcher = Fetcher::new(Some(FlareSolverrClient::new(solver.uri())));
    let err = fetcher
        .fetch("https://blocked.example/page", FetchMode::Bypass)
        .await
        .expect_err("origin 403 through the solver must surface");
    match err {
        // Auto would fall back; plain bypass propagates the status
        FetchError::HttpStatus(403) => {}
        other => panic!("expected HttpStatus(403), got {other:?}"),
    }
}
