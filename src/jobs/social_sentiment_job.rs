//! Social sentiment scraping and aggregation.
//!
//! Three mutually-exclusive fetch strategies exist behind one trait:
//! driving the platform through the challenge-bypass browser proxy,
//! scraping a privacy front-end, or calling an unauthenticated JSON
//! endpoint. Which one runs is a deployment decision
//! (`SOCIAL_SENTIMENT_STRATEGY`), not a code path per job.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::{social_queries, watchlist_queries};
use crate::errors::AppError;
use crate::fetch::{FetchMode, Fetcher};
use crate::llm::{
    build_crowd_sentiment_prompt, crowd_sentiment_timeout_secs, parse_crowd_sentiment,
    GenerateOptions,
};
use crate::models::CrowdSentimentLabel;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};
use crate::services::rate_limiter::social_search_delay;

/// Tickers per run; tier A first so the interesting names never starve.
const MAX_TICKERS_PER_RUN: usize = 15;
const MAX_POSTS_PER_TICKER: usize = 40;

#[derive(Debug, Clone)]
pub struct RawPost {
    pub post_id: String,
    pub content: String,
    pub author: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub engagement_score: f64,
}

/// One way of obtaining recent posts mentioning a ticker.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    fn platform(&self) -> &'static str;
    async fn fetch_posts(&self, ticker: &str) -> Result<Vec<RawPost>, AppError>;
}

pub fn source_from_env(fetcher: &Fetcher) -> Arc<dyn SentimentSource> {
    let strategy = std::env::var("SOCIAL_SENTIMENT_STRATEGY")
        .unwrap_or_else(|_| "privacy_frontend".to_string());
    match strategy.as_str() {
        "browser" => Arc::new(BrowserSource {
            fetcher: fetcher.with_crawl_delay(),
        }),
        "endpoint" => Arc::new(EndpointSource {
            fetcher: fetcher.clone(),
        }),
        _ => Arc::new(PrivacyFrontendSource {
            fetcher: fetcher.with_crawl_delay(),
        }),
    }
}

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("💬 Scraping social sentiment for {target_date}...");

    let source = source_from_env(&ctx.fetcher);
    let model = ctx.llm.default_model().to_string();

    let watched = watchlist_queries::active_by_tier(&ctx.stores.ops).await?;
    let tickers: Vec<String> = watched
        .into_iter()
        .take(MAX_TICKERS_PER_RUN)
        .map(|w| w.ticker)
        .collect();

    if tickers.is_empty() {
        return Ok(JobOutcome {
            message: "no watched tickers".into(),
            ..Default::default()
        });
    }

    let mut report = PipelineReport::default();
    let mut first = true;

    for ticker in &tickers {
        if ctx.is_cancelled() {
            break;
        }
        if !first {
            // uniform(10, 30) s between ticker searches
            social_search_delay().await;
        }
        first = false;

        let posts = match source.fetch_posts(ticker).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!("❌ Failed to fetch posts for {ticker}: {e}");
                report.errors += 1;
                continue;
            }
        };

        report.found += posts.len() as i32;
        if posts.is_empty() {
            report.skipped += 1;
            continue;
        }

        let verdict = crowd_verdict(ctx, &model, ticker, &posts).await;

        let label = CrowdSentimentLabel::from_label(&verdict.sentiment)
            .unwrap_or(CrowdSentimentLabel::Neutral);
        let bull_bear = if verdict.bear_ratio > 0.0 {
            Some(verdict.bull_ratio / verdict.bear_ratio)
        } else {
            None
        };

        let metric_id = match social_queries::insert_metric(
            &ctx.stores.research,
            ticker,
            source.platform(),
            posts.len() as i32,
            label,
            verdict.score,
            bull_bear,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("❌ Failed to insert metric for {ticker}: {e}");
                report.errors += 1;
                continue;
            }
        };

        for post in &posts {
            match social_queries::insert_post(
                &ctx.stores.research,
                source.platform(),
                &post.post_id,
                &post.content,
                &post.author,
                post.posted_at,
                post.engagement_score,
                &[ticker.clone()],
                Some(metric_id),
            )
            .await
            {
                Ok(true) => report.new += 1,
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    warn!("Failed to insert post {}: {e}", post.post_id);
                    report.errors += 1;
                }
            }
        }

        report.record_ticker(ticker);
    }

    let message = report.message();
    info!("Social sentiment: {message}");
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}

/// Ask the LLM for a crowd verdict; malformed or unavailable output
/// degrades to NEUTRAL/0.0 while the volume still gets recorded.
async fn crowd_verdict(
    ctx: &JobContext,
    model: &str,
    ticker: &str,
    posts: &[RawPost],
) -> crate::llm::CrowdSentiment {
    let texts: Vec<String> = posts.iter().map(|p| p.content.clone()).collect();
    let prompt = build_crowd_sentiment_prompt(ticker, &texts);
    let opts = GenerateOptions {
        json_mode: true,
        stream_timeout: Some(Duration::from_secs(crowd_sentiment_timeout_secs(
            prompt.len(),
        ))),
        ..Default::default()
    };

    match ctx.llm.generate(model, &prompt, &opts).await {
        Ok(response) => parse_crowd_sentiment(&response),
        Err(e) => {
            warn!("Crowd sentiment analyzer unavailable for {ticker}: {e}");
            crate::llm::CrowdSentiment::default()
        }
    }
}

// --- Strategy: privacy front-end -------------------------------------------

struct PrivacyFrontendSource {
    fetcher: Fetcher,
}

#[async_trait]
impl SentimentSource for PrivacyFrontendSource {
    fn platform(&self) -> &'static str {
        "twitter"
    }

    async fn fetch_posts(&self, ticker: &str) -> Result<Vec<RawPost>, AppError> {
        let base = std::env::var("PRIVACY_FRONTEND_URL")
            .unwrap_or_else(|_| "https://nitter.net".to_string());
        let url = format!("{}/search?f=tweets&q=%24{}", base.trim_end_matches('/'), ticker);

        let body = self.fetcher.fetch(&url, FetchMode::Auto).await?;
        Ok(parse_frontend_timeline(&String::from_utf8_lossy(&body)))
    }
}

fn parse_frontend_timeline(html: &str) -> Vec<RawPost> {
    let document = Html::parse_document(html);
    let item_sel = Selector::parse(".timeline-item").expect("static selector");
    let content_sel = Selector::parse(".tweet-content").expect("static selector");
    let author_sel = Selector::parse(".username").expect("static selector");
    let link_sel = Selector::parse("a.tweet-link").expect("static selector");
    let stat_sel = Selector::parse(".tweet-stat .icon-container").expect("static selector");

    let mut posts = Vec::new();

    for item in document.select(&item_sel).take(MAX_POSTS_PER_TICKER) {
        let content: String = item
            .select(&content_sel)
            .next()
            .map(|c| c.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            continue;
        }

        let post_id = item
            .select(&link_sel)
            .next()
            .and_then(|l| l.value().attr("href"))
            .map(|href| href.trim_matches('/').replace("#m", ""))
            .unwrap_or_else(|| format!("hash-{:x}", content_hash(&content)));

        let author = item
            .select(&author_sel)
            .next()
            .map(|a| a.text().collect::<String>().trim().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let engagement: f64 = item
            .select(&stat_sel)
            .filter_map(|s| {
                s.text()
                    .collect::<String>()
                    .trim()
                    .replace(',', "")
                    .parse::<f64>()
                    .ok()
            })
            .sum();

        posts.push(RawPost {
            post_id,
            content,
            author,
            posted_at: None,
            engagement_score: engagement,
        });
    }

    posts
}

// --- Strategy: unauthenticated endpoint -------------------------------------

struct EndpointSource {
    fetcher: Fetcher,
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(default)]
    messages: Vec<EndpointMessage>,
}

#[derive(Debug, Deserialize)]
struct EndpointMessage {
    id: i64,
    body: String,
    created_at: Option<DateTime<Utc>>,
    user: Option<EndpointUser>,
    #[serde(default)]
    likes: Option<EndpointLikes>,
}

#[derive(Debug, Deserialize)]
struct EndpointUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct EndpointLikes {
    #[serde(default)]
    total: f64,
}

#[async_trait]
impl SentimentSource for EndpointSource {
    fn platform(&self) -> &'static str {
        "stocktwits"
    }

    async fn fetch_posts(&self, ticker: &str) -> Result<Vec<RawPost>, AppError> {
        let base = std::env::var("SOCIAL_ENDPOINT_URL")
            .unwrap_or_else(|_| "https://api.stocktwits.com/api/2".to_string());
        let url = format!("{}/streams/symbol/{}.json", base.trim_end_matches('/'), ticker);

        let body = self.fetcher.fetch(&url, FetchMode::Direct).await?;
        let parsed: EndpointResponse = serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("endpoint payload: {e}")))?;

        Ok(parsed
            .messages
            .into_iter()
            .take(MAX_POSTS_PER_TICKER)
            .map(|m| RawPost {
                post_id: m.id.to_string(),
                content: m.body,
                author: m.user.map(|u| u.username).unwrap_or_else(|| "unknown".into()),
                posted_at: m.created_at,
                engagement_score: m.likes.map(|l| l.total).unwrap_or(0.0),
            })
            .collect())
    }
}

// --- Strategy: headless browser via challenge solver ------------------------

struct BrowserSource {
    fetcher: Fetcher,
}

#[async_trait]
impl SentimentSource for BrowserSource {
    fn platform(&self) -> &'static str {
        "twitter"
    }

    /// The solver renders the logged-out search page; the result parses the
    /// same as the privacy front-end timeline markup.
    async fn fetch_posts(&self, ticker: &str) -> Result<Vec<RawPost>, AppError> {
        let base = std::env::var("SOCIAL_BROWSER_URL")
            .unwrap_or_else(|_| "https://twitter.com".to_string());
        let url = format!("{}/search?q=%24{}&f=live", base.trim_end_matches('/'), ticker);

        let body = self.fetcher.fetch(&url, FetchMode::Bypass).await?;
        Ok(parse_frontend_timeline(&String::from_utf8_lossy(&body)))
    }
}

fn content_hash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE: &str = r#"
    <div class="timeline">
      <div class="timeline-item">
        <a class="tweet-link" href="/trader1/status/123#m"></a>
        <a class="username">@trader1</a>
        <div class="tweet-content">$AAPL breaking out, earnings momentum is real</div>
        <span class="tweet-stat"><div class="icon-container">42</div></span>
      </div>
      <div class="timeline-item">
        <a class="username">@trader2</a>
        <div class="tweet-content"></div>
      </div>
      <div class="timeline-item">
        <a class="tweet-link" href="/trader3/status/456#m"></a>
        <a class="username">@trader3</a>
        <div class="tweet-content">puts printing on $AAPL</div>
        <span class="tweet-stat"><div class="icon-container">7</div></span>
        <span class="tweet-stat"><div class="icon-container">3</div></span>
      </div>
    </div>
    "#;

    #[test]
    fn test_parse_frontend_timeline() {
        let posts = parse_frontend_timeline(TIMELINE);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].post_id, "trader1/status/123");
        assert_eq!(posts[0].author, "@trader1");
        assert_eq!(posts[0].engagement_score, 42.0);
        assert_eq!(posts[1].engagement_score, 10.0);
    }

    #[test]
    fn test_parse_empty_timeline() {
        assert!(parse_frontend_timeline("<html></html>").is_empty());
    }

    #[test]
    fn test_endpoint_payload_parses() {
        let payload = r#"{"messages":[{"id":9,"body":"$TSLA to the moon","created_at":"2025-06-05T10:00:00Z","user":{"username":"bull"},"likes":{"total":5}}]}"#;
        let parsed: EndpointResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].id, 9);
    }
}
