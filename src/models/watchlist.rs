use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Watchlist tier, driven by how many independent sources mention a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum PriorityTier {
    A,
    B,
    C,
}

impl PriorityTier {
    /// Tier from the number of distinct sources mentioning the ticker.
    pub fn from_source_count(count: i32) -> Self {
        match count {
            c if c >= 3 => PriorityTier::A,
            2 => PriorityTier::B,
            _ => PriorityTier::C,
        }
    }
}

/// A ticker the analysis jobs should keep current. Derived daily from
/// holdings, congress trades, article mentions, and extreme sentiment;
/// deactivated (never deleted) when all sources go quiet.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WatchedTicker {
    pub ticker: String,
    pub priority_tier: PriorityTier,
    pub is_active: bool,
    /// Comma-joined source names, e.g. "holdings,congress".
    pub source: String,
    pub source_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Daily LLM-written digest for one watched ticker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TickerAnalysis {
    pub id: Uuid,
    pub ticker: String,
    pub as_of: NaiveDate,
    pub summary: String,
    pub sentiment: Option<String>,
    pub sentiment_score: Option<f64>,
    pub article_count: i32,
    pub social_volume: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_source_count() {
        assert_eq!(PriorityTier::from_source_count(4), PriorityTier::A);
        assert_eq!(PriorityTier::from_source_count(3), PriorityTier::A);
        assert_eq!(PriorityTier::from_source_count(2), PriorityTier::B);
        assert_eq!(PriorityTier::from_source_count(1), PriorityTier::C);
        assert_eq!(PriorityTier::from_source_count(0), PriorityTier::C);
    }
}
