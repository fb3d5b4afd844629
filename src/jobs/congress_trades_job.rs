//! Congressional trade disclosures, scraped from the aggregator's listing
//! table. Rows upsert on (politician, ticker, transaction_date, amount);
//! the disclosed amount is a dollar range string, kept verbatim.

use chrono::{NaiveDate, Utc};
use scraper::{Html, Selector};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::market_queries;
use crate::errors::AppError;
use crate::fetch::FetchMode;
use crate::models::CongressTrade;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const DEFAULT_SOURCE_URL: &str = "https://www.capitoltrades.example/trades";

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    let source_url = std::env::var("CONGRESS_TRADES_URL")
        .unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string());

    info!("🏛️ Fetching congress trades for {target_date}...");
    ctx.pipeline.check_robots(&source_url).await?;

    let fetcher = ctx.fetcher.with_crawl_delay();
    let body = fetcher.fetch(&source_url, FetchMode::Auto).await?;
    let html = String::from_utf8_lossy(&body);

    let trades = parse_trades_page(&html, None);
    let mut report = PipelineReport::default();
    report.found = trades.len() as i32;

    for trade in trades {
        match market_queries::upsert_congress_trade(&ctx.stores.ops, &trade).await {
            Ok(true) => {
                report.new += 1;
                report.record_ticker(&trade.ticker);
            }
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                warn!("❌ Failed to upsert congress trade for {}: {e}", trade.politician);
                report.errors += 1;
            }
        }
    }

    let message = report.message();
    info!("Congress trades: {message}");
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}

/// Parse the listing table. Expected columns:
/// politician | chamber | ticker | transaction | amount | traded | disclosed
pub fn parse_trades_page(html: &str, batch_id: Option<&str>) -> Vec<CongressTrade> {
    let document = Html::parse_document(html);
    let row_sel = Selector::parse("table.trades-table tbody tr, table#trades tbody tr")
        .expect("static selector");
    let cell_sel = Selector::parse("td").expect("static selector");

    let mut trades = Vec::new();

    for row in document.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();

        if cells.len() < 6 {
            continue;
        }

        let politician = cells[0].clone();
        let ticker = cells[2].to_uppercase();
        if politician.is_empty() || ticker.is_empty() || ticker == "--" {
            continue;
        }

        let Ok(transaction_date) = NaiveDate::parse_from_str(&cells[5], "%Y-%m-%d") else {
            continue;
        };
        let disclosure_date = cells
            .get(6)
            .and_then(|c| NaiveDate::parse_from_str(c, "%Y-%m-%d").ok());

        trades.push(CongressTrade {
            id: Uuid::new_v4(),
            politician,
            chamber: Some(cells[1].clone()).filter(|c| !c.is_empty()),
            ticker,
            transaction_date,
            disclosure_date,
            trade_type: cells[3].to_lowercase(),
            amount: cells[4].clone(),
            batch_id: batch_id.map(|b| b.to_string()),
            fetched_at: Utc::now(),
        });
    }

    trades
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
    <html><body>
    <table class="trades-table">
      <tbody>
        <tr>
          <td>Jane Smith</td><td>House</td><td>nvda</td><td>Buy</td>
          <td>$1,001 - $15,000</td><td>2025-06-02</td><td>2025-06-10</td>
        </tr>
        <tr>
          <td>John Doe</td><td>Senate</td><td>--</td><td>Sell</td>
          <td>$15,001 - $50,000</td><td>2025-06-03</td><td>2025-06-11</td>
        </tr>
        <tr>
          <td>Ann Lee</td><td>House</td><td>MSFT</td><td>Sell</td>
          <td>$50,001 - $100,000</td><td>not-a-date</td><td></td>
        </tr>
      </tbody>
    </table>
    </body></html>
    "#;

    #[test]
    fn test_parse_trades_page() {
        let trades = parse_trades_page(PAGE, Some("batch-1"));
        // Row 2 has no ticker, row 3 has a bad date
        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.politician, "Jane Smith");
        assert_eq!(trade.ticker, "NVDA");
        assert_eq!(trade.trade_type, "buy");
        assert_eq!(trade.amount, "$1,001 - $15,000");
        assert_eq!(trade.batch_id.as_deref(), Some("batch-1"));
        assert_eq!(
            trade.transaction_date,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
        );
    }

    #[test]
    fn test_parse_empty_page() {
        assert!(parse_trades_page("<html></html>", None).is_empty());
    }
}
