//! Batch import of historical congress trades. Pages the source through
//! the bypass fetcher, filters to the requested window, and upserts under
//! one batch id, which is printed to stdout for the operator.

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{market_queries, Stores};
use crate::fetch::{FetchMode, Fetcher};
use crate::jobs::congress_trades_job::parse_trades_page;

/// Trades newer than this are left for the nightly job when
/// `--skip-recent` is set; they would double up otherwise.
const RECENT_WINDOW_DAYS: i64 = 3;

pub struct SeedArgs {
    pub months_back: u32,
    pub page_size: u32,
    pub start_page: u32,
    pub skip_recent: bool,
}

pub async fn run(stores: &Stores, fetcher: &Fetcher, args: SeedArgs) -> anyhow::Result<String> {
    let base_url = std::env::var("CONGRESS_TRADES_URL")
        .unwrap_or_else(|_| "https://www.capitoltrades.example/trades".to_string());

    let batch_id = format!("seed-{}", Uuid::new_v4());
    let today = Utc::now().date_naive();
    let cutoff = today - Duration::days(args.months_back as i64 * 30);
    let recent_floor = today - Duration::days(RECENT_WINDOW_DAYS);

    info!(
        "Seeding congress trades: months_back={} page_size={} start_page={} skip_recent={} batch={}",
        args.months_back, args.page_size, args.start_page, args.skip_recent, batch_id
    );

    let crawl_fetcher = fetcher.with_crawl_delay();
    let mut page = args.start_page;
    let mut total_new = 0u32;
    let mut total_seen = 0u32;

    loop {
        let url = format!("{base_url}?page={page}&pageSize={}", args.page_size);
        info!("Fetching page {page}: {url}");

        let body = match crawl_fetcher.fetch(&url, FetchMode::Auto).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Stopping at page {page}: {e}");
                break;
            }
        };

        let trades = parse_trades_page(&String::from_utf8_lossy(&body), Some(&batch_id));
        if trades.is_empty() {
            info!("Page {page} empty; pagination exhausted");
            break;
        }

        let mut page_in_window = 0u32;
        let mut oldest_past_cutoff = false;

        for trade in &trades {
            total_seen += 1;
            if trade.transaction_date < cutoff {
                oldest_past_cutoff = true;
                continue;
            }
            if args.skip_recent && trade.transaction_date > recent_floor {
                continue;
            }
            page_in_window += 1;
            match market_queries::upsert_congress_trade(&stores.ops, trade).await {
                Ok(true) => total_new += 1,
                Ok(false) => {}
                Err(e) => warn!("Upsert failed for {}: {e}", trade.politician),
            }
        }

        info!("Page {page}: {} trades, {} in window", trades.len(), page_in_window);

        // Listings are newest-first; once a page crosses the cutoff there
        // is nothing older worth fetching
        if oldest_past_cutoff {
            break;
        }
        page += 1;
    }

    info!("Seed complete: {total_new} new of {total_seen} seen");
    Ok(batch_id)
}
