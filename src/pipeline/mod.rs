//! Shared plumbing for the scraping-and-analysis jobs.
//!
//! Every domain job is the same shape: fetch → parse → dedupe-check →
//! analyze (optional) → embed (optional) → upsert → accounting. This module
//! carries the accounting report and the helpers that keep the pipeline
//! invariants honest: items are addressed by natural key so re-runs no-op
//! (P1), analyzer failures never drop items (P2), fetches are polite (P3),
//! and robots.txt is honored when enforcement is on (P4).

use std::time::Duration;

use crate::errors::AppError;
use crate::fetch::Fetcher;
use crate::llm::{
    build_summary_prompt, parse_summary_response, ChainOfThoughtSummary, GenerateOptions,
    LlmRouter,
};
use crate::models::{ArticleAnalysis, ArticleSentiment};
use crate::services::rate_limiter::HostGate;
use crate::services::robots;

/// Minimum spacing between two fetches against the same host.
pub const PER_HOST_DELAY: Duration = Duration::from_secs(2);

/// Per-run accounting, reported as one structured message at job end.
#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    pub found: i32,
    pub new: i32,
    pub duplicates: i32,
    pub skipped: i32,
    pub errors: i32,
    pub tickers: Vec<String>,
}

impl PipelineReport {
    pub fn record_ticker(&mut self, ticker: &str) {
        if !self.tickers.iter().any(|t| t == ticker) {
            self.tickers.push(ticker.to_string());
        }
    }

    pub fn message(&self) -> String {
        format!(
            "found {}; new {}; duplicates {}; skipped {}; errors {}",
            self.found, self.new, self.duplicates, self.skipped, self.errors
        )
    }
}

impl std::fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Shared pipeline context handed to each scrape job.
#[derive(Clone)]
pub struct PipelineContext {
    pub fetcher: Fetcher,
    pub llm: LlmRouter,
    pub host_gate: std::sync::Arc<HostGate>,
}

impl PipelineContext {
    pub fn new(fetcher: Fetcher, llm: LlmRouter) -> Self {
        Self {
            fetcher,
            llm,
            host_gate: std::sync::Arc::new(HostGate::new(PER_HOST_DELAY)),
        }
    }

    /// P4: abort with a structured robots-disallowed failure before a job
    /// starts crawling, when enforcement is enabled.
    pub async fn check_robots(&self, representative_url: &str) -> Result<(), AppError> {
        robots::check_or_abort(&self.fetcher, representative_url).await
    }

    /// P3: wait out the per-host politeness delay.
    pub async fn polite(&self, url: &str) {
        let host = crate::rss::extract_source_from_url(url);
        self.host_gate.acquire(&host).await;
    }

    /// Run the chain-of-thought analyzer over article text. Failures come
    /// back as None so the caller persists the item without analysis (P2).
    pub async fn analyze_text(&self, model: &str, text: &str) -> Option<ChainOfThoughtSummary> {
        let prompt = build_summary_prompt(text);
        let opts = GenerateOptions {
            json_mode: true,
            ..Default::default()
        };
        match self.llm.generate(model, &prompt, &opts).await {
            Ok(response) => parse_summary_response(&response),
            Err(e) => {
                tracing::warn!("Analyzer unavailable ({e}); item kept without summary");
                None
            }
        }
    }

    /// Optional embedding; an empty vector means "no embedding".
    pub async fn embed_text(&self, text: &str) -> Vec<f32> {
        self.llm.embed(text, crate::llm::DEFAULT_EMBED_MODEL).await
    }
}

/// Map an analyzer result onto the article analysis columns; None yields
/// the all-null analysis that marks an item for future re-analysis.
pub fn analysis_from_summary(summary: Option<&ChainOfThoughtSummary>) -> ArticleAnalysis {
    match summary {
        None => ArticleAnalysis::default(),
        Some(s) => ArticleAnalysis {
            summary: Some(s.summary.clone()),
            tickers: s.tickers.clone(),
            sector: s.sectors.first().cloned(),
            sentiment: ArticleSentiment::from_label(&s.sentiment),
            sentiment_score: Some(s.sentiment_score),
            claims: if s.claims.is_empty() {
                None
            } else {
                Some(s.claims.join("\n"))
            },
            fact_check: Some(s.fact_check.clone()).filter(|v| !v.is_empty()),
            conclusion: Some(s.conclusion.clone()).filter(|v| !v.is_empty()),
            relevance_score: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_message_format() {
        let report = PipelineReport {
            found: 10,
            new: 5,
            duplicates: 3,
            skipped: 1,
            errors: 1,
            tickers: vec![],
        };
        assert_eq!(
            report.message(),
            "found 10; new 5; duplicates 3; skipped 1; errors 1"
        );
    }

    #[test]
    fn test_record_ticker_dedupes() {
        let mut report = PipelineReport::default();
        report.record_ticker("AAPL");
        report.record_ticker("AAPL");
        report.record_ticker("MSFT");
        assert_eq!(report.tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_analysis_from_none_is_all_null() {
        let analysis = analysis_from_summary(None);
        assert!(analysis.summary.is_none());
        assert!(analysis.sentiment.is_none());
        assert!(analysis.tickers.is_empty());
    }

    #[test]
    fn test_analysis_from_summary_maps_fields() {
        let summary = ChainOfThoughtSummary {
            summary: "ok".into(),
            sentiment: "BULLISH".into(),
            sentiment_score: 1.0,
            tickers: vec!["AAPL".into()],
            sectors: vec!["Technology".into()],
            claims: vec!["claim one".into(), "claim two".into()],
            ..Default::default()
        };
        let analysis = analysis_from_summary(Some(&summary));
        assert_eq!(analysis.summary.as_deref(), Some("ok"));
        assert_eq!(analysis.sentiment, Some(ArticleSentiment::Bullish));
        assert_eq!(analysis.sector.as_deref(), Some("Technology"));
        assert_eq!(analysis.claims.as_deref(), Some("claim one\nclaim two"));
    }
}
