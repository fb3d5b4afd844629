use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Article sentiment scale used by the research pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArticleSentiment {
    VeryBullish,
    Bullish,
    Neutral,
    Bearish,
    VeryBearish,
}

impl ArticleSentiment {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "VERY_BULLISH" => Some(Self::VeryBullish),
            "BULLISH" => Some(Self::Bullish),
            "NEUTRAL" => Some(Self::Neutral),
            "BEARISH" => Some(Self::Bearish),
            "VERY_BEARISH" => Some(Self::VeryBearish),
            _ => None,
        }
    }
}

/// A research article, keyed by URL. Upserts preserve the original
/// `fetched_at`; re-analysis rewrites only the analysis fields.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Article {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub content: String,
    pub summary: Option<String>,
    pub tickers: Vec<String>,
    pub sector: Option<String>,
    pub sentiment: Option<ArticleSentiment>,
    pub sentiment_score: Option<f64>,
    pub claims: Option<String>,
    pub fact_check: Option<String>,
    pub conclusion: Option<String>,
    pub relevance_score: Option<f64>,
    /// 768-dim vector from the local embedding model; absent until embedded.
    pub embedding: Option<serde_json::Value>,
}

/// The analysis fields that a re-analyze pass is allowed to rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    pub summary: Option<String>,
    pub tickers: Vec<String>,
    pub sector: Option<String>,
    pub sentiment: Option<ArticleSentiment>,
    pub sentiment_score: Option<f64>,
    pub claims: Option<String>,
    pub fact_check: Option<String>,
    pub conclusion: Option<String>,
    pub relevance_score: Option<f64>,
}

/// One item extracted from an RSS/Atom feed, post junk-filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedItem {
    pub title: String,
    pub url: String,
    pub content: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
    pub tickers: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
}
