//! Insider-trade ingestion. The source page embeds its table data as a
//! JSON payload in a script tag; we parse that rather than the rendered
//! HTML. Value strings arrive in display form ("$1.2M", "1,234") and are
//! normalized by the parsing helpers below.

use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{Duration, NaiveDate, Utc};
use std::sync::OnceLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::market_queries;
use crate::errors::AppError;
use crate::fetch::FetchMode;
use crate::models::InsiderTrade;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const DEFAULT_SOURCE_URL: &str = "https://www.openinsider.example/latest-insider-trades";
/// Trades older than this are skipped; the nightly cadence re-covers the gap.
const MAX_TRADE_AGE_DAYS: i64 = 30;

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    let source_url = std::env::var("INSIDER_TRADES_URL")
        .unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string());

    info!("🕵️ Fetching insider trades for {target_date}...");
    ctx.pipeline.check_robots(&source_url).await?;

    let fetcher = ctx.fetcher.with_crawl_delay();
    let body = fetcher.fetch(&source_url, FetchMode::Auto).await?;
    let html = String::from_utf8_lossy(&body);

    let Some(payload) = extract_embedded_json(&html) else {
        let message = "No insider trades data found on source page".to_string();
        warn!("{message}");
        return Ok(JobOutcome {
            message,
            ..Default::default()
        });
    };

    let rows: Vec<serde_json::Value> = serde_json::from_str(&payload)
        .map_err(|e| AppError::Validation(format!("embedded payload: {e}")))?;

    let cutoff = target_date - Duration::days(MAX_TRADE_AGE_DAYS);
    let mut report = PipelineReport::default();

    for row in rows {
        report.found += 1;
        let Some(trade) = parse_trade_row(&row, cutoff) else {
            report.skipped += 1;
            continue;
        };

        match market_queries::upsert_insider_trade(&ctx.stores.ops, &trade).await {
            Ok(true) => {
                report.new += 1;
                report.record_ticker(&trade.ticker);
            }
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                warn!("❌ Failed to upsert insider trade for {}: {e}", trade.ticker);
                report.errors += 1;
            }
        }
    }

    let message = report.message();
    info!("Insider trades: {message}");
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}

/// The data payload lives in `<script id="trades-data" type="application/json">`
/// or a `window.__TRADES__ = [...]` assignment, depending on page version.
fn extract_embedded_json(html: &str) -> Option<String> {
    static SCRIPT_RE: OnceLock<regex::Regex> = OnceLock::new();
    static ASSIGN_RE: OnceLock<regex::Regex> = OnceLock::new();

    let script_re = SCRIPT_RE.get_or_init(|| {
        regex::Regex::new(r#"(?is)<script[^>]*type="application/json"[^>]*>(.*?)</script>"#)
            .unwrap()
    });
    if let Some(caps) = script_re.captures(html) {
        let payload = caps[1].trim();
        if payload.starts_with('[') {
            return Some(payload.to_string());
        }
    }

    let assign_re = ASSIGN_RE
        .get_or_init(|| regex::Regex::new(r"(?s)window\.__TRADES__\s*=\s*(\[.*?\]);").unwrap());
    assign_re
        .captures(html)
        .map(|caps| caps[1].trim().to_string())
}

fn parse_trade_row(row: &serde_json::Value, cutoff: NaiveDate) -> Option<InsiderTrade> {
    let ticker = row.get("ticker")?.as_str()?.trim().to_uppercase();
    let insider_name = row.get("insider")?.as_str()?.trim().to_string();
    if ticker.is_empty() || insider_name.is_empty() {
        return None;
    }

    let transaction_date =
        NaiveDate::parse_from_str(row.get("date")?.as_str()?, "%Y-%m-%d").ok()?;
    if transaction_date < cutoff {
        return None;
    }

    let trade_type = row
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_lowercase();
    let shares = parse_shares(row.get("shares").and_then(|v| v.as_str()).unwrap_or(""))?;
    let price_per_share = row
        .get("price")
        .and_then(|v| v.as_str())
        .and_then(parse_value)
        .and_then(BigDecimal::from_f64);
    let total_value = row
        .get("value")
        .and_then(|v| v.as_str())
        .and_then(parse_value)
        .and_then(BigDecimal::from_f64);

    Some(InsiderTrade {
        id: Uuid::new_v4(),
        ticker,
        insider_name,
        insider_title: row
            .get("title")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string()),
        transaction_date,
        trade_type,
        shares,
        price_per_share,
        total_value,
        fetched_at: Utc::now(),
    })
}

/// Parse a display money string: "$1.2M" → 1_200_000.0, "(13.5K)" → -13_500.0.
pub fn parse_value(value_str: &str) -> Option<f64> {
    let mut s = value_str.trim().to_string();
    if s.is_empty() || s == "-" {
        return None;
    }

    let negative = s.starts_with('(') && s.ends_with(')');
    if negative {
        s = s[1..s.len() - 1].to_string();
    }

    s = s.replace(['$', ','], "");

    let multiplier = match s.chars().last() {
        Some('K') | Some('k') => 1_000.0,
        Some('M') | Some('m') => 1_000_000.0,
        Some('B') | Some('b') => 1_000_000_000.0,
        _ => 1.0,
    };
    if multiplier != 1.0 {
        s.pop();
    }

    let value: f64 = s.trim().parse().ok()?;
    Some(if negative {
        -value * multiplier
    } else {
        value * multiplier
    })
}

/// Parse a share count: "1,234" → 1234, "2.5K" → 2500.
pub fn parse_shares(shares_str: &str) -> Option<i64> {
    parse_value(shares_str).map(|v| v.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_suffixes() {
        assert_eq!(parse_value("$1.2M"), Some(1_200_000.0));
        assert_eq!(parse_value("13.5K"), Some(13_500.0));
        assert_eq!(parse_value("$2B"), Some(2_000_000_000.0));
        assert_eq!(parse_value("1,234.56"), Some(1_234.56));
        assert_eq!(parse_value("(500)"), Some(-500.0));
        assert_eq!(parse_value(""), None);
        assert_eq!(parse_value("-"), None);
        assert_eq!(parse_value("n/a"), None);
    }

    #[test]
    fn test_parse_shares() {
        assert_eq!(parse_shares("1,234"), Some(1234));
        assert_eq!(parse_shares("2.5K"), Some(2500));
        assert_eq!(parse_shares(""), None);
    }

    #[test]
    fn test_extract_embedded_json_script_tag() {
        let html = r#"<html><script id="trades-data" type="application/json">[{"ticker":"AAPL"}]</script></html>"#;
        assert_eq!(
            extract_embedded_json(html),
            Some(r#"[{"ticker":"AAPL"}]"#.to_string())
        );
    }

    #[test]
    fn test_extract_embedded_json_assignment() {
        let html = r#"<script>window.__TRADES__ = [{"ticker":"MSFT"}];</script>"#;
        assert_eq!(
            extract_embedded_json(html),
            Some(r#"[{"ticker":"MSFT"}]"#.to_string())
        );
    }

    #[test]
    fn test_extract_embedded_json_absent() {
        assert_eq!(extract_embedded_json("<html><body>table</body></html>"), None);
    }

    #[test]
    fn test_parse_trade_row_filters_old() {
        let row = serde_json::json!({
            "ticker": "aapl",
            "insider": "Jane Doe",
            "title": "CFO",
            "date": "2025-06-01",
            "type": "Buy",
            "shares": "1,000",
            "price": "$150.25",
            "value": "$150.3K"
        });
        let cutoff = NaiveDate::from_ymd_opt(2025, 5, 15).unwrap();
        let trade = parse_trade_row(&row, cutoff).unwrap();
        assert_eq!(trade.ticker, "AAPL");
        assert_eq!(trade.shares, 1000);
        assert_eq!(trade.trade_type, "buy");

        let old_cutoff = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        assert!(parse_trade_row(&row, old_cutoff).is_none());
    }
}
