pub mod benchmark_refresh_job;
pub mod congress_trades_job;
pub mod dividend_processing_job;
pub mod exchange_rates_job;
pub mod insider_trades_job;
pub mod performance_metrics_job;
pub mod research_ingest_job;
pub mod rss_ingest_job;
pub mod social_sentiment_job;
pub mod ticker_analysis_job;
pub mod update_portfolio_prices_job;
pub mod watchlist_update_job;

pub const UPDATE_PORTFOLIO_PRICES: &str = "update_portfolio_prices";
pub const PERFORMANCE_METRICS: &str = "performance_metrics";
pub const DIVIDEND_PROCESSING: &str = "dividend_processing";
pub const BENCHMARK_REFRESH: &str = "benchmark_refresh";
pub const EXCHANGE_RATES: &str = "exchange_rates";
pub const INSIDER_TRADES: &str = "insider_trades";
pub const CONGRESS_TRADES: &str = "congress_trades";
pub const RSS_INGEST: &str = "rss_ingest";
pub const SOCIAL_SENTIMENT: &str = "social_sentiment";
pub const RESEARCH_INGEST: &str = "research_ingest";
pub const TICKER_ANALYSIS: &str = "ticker_analysis";
pub const WATCHLIST_UPDATE: &str = "watchlist_update";

/// Jobs whose output is deterministic and idempotent given a target date.
/// Only these are safe for the watchdog to retry; scrapers and LLM
/// summaries are not (their sources move underneath them).
pub const CALCULATION_JOBS: [&str; 5] = [
    UPDATE_PORTFOLIO_PRICES,
    PERFORMANCE_METRICS,
    DIVIDEND_PROCESSING,
    BENCHMARK_REFRESH,
    EXCHANGE_RATES,
];

pub fn is_calculation_job(job_name: &str) -> bool {
    CALCULATION_JOBS.contains(&job_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculation_job_classification() {
        assert!(is_calculation_job("update_portfolio_prices"));
        assert!(is_calculation_job("performance_metrics"));
        assert!(is_calculation_job("exchange_rates"));
        assert!(!is_calculation_job("rss_ingest"));
        assert!(!is_calculation_job("social_sentiment"));
        assert!(!is_calculation_job("watchdog"));
    }
}
