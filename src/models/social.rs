use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Crowd-sentiment scale for social metrics. Wider than the article scale:
/// retail crowds overshoot in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrowdSentimentLabel {
    Euphoric,
    Bullish,
    Neutral,
    Bearish,
    Fearful,
}

impl CrowdSentimentLabel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "EUPHORIC" => Some(Self::Euphoric),
            "BULLISH" => Some(Self::Bullish),
            "NEUTRAL" => Some(Self::Neutral),
            "BEARISH" => Some(Self::Bearish),
            "FEARFUL" => Some(Self::Fearful),
            _ => None,
        }
    }

    /// Extreme readings feed the watchlist derivation.
    pub fn is_extreme(&self) -> bool {
        matches!(self, Self::Euphoric | Self::Fearful)
    }
}

/// A scraped social post. Insert-only; keyed by (platform, post_id).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SocialPost {
    pub id: Uuid,
    pub platform: String,
    pub post_id: String,
    pub content: String,
    pub author: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub engagement_score: f64,
    pub tickers: Vec<String>,
    /// Set when the post contributed to an aggregated metric row.
    pub metric_id: Option<Uuid>,
}

/// Append-only sentiment time series per (ticker, platform). "Latest per
/// (ticker, platform)" is a derived view, not a mutation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SocialMetric {
    pub id: Uuid,
    pub ticker: String,
    pub platform: String,
    pub volume: i32,
    pub sentiment_label: CrowdSentimentLabel,
    pub sentiment_score: f64,
    pub bull_bear_ratio: Option<f64>,
    pub created_at: DateTime<Utc>,
}
