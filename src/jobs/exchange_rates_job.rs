//! FX refresh for the currency pairs the valuation chain needs. The
//! observation timestamp is pinned to the target date's midnight so a
//! re-run upserts onto the same natural key instead of appending.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, TimeZone, Utc};
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::market_queries;
use crate::errors::AppError;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

const PAIRS: [(&str, &str); 2] = [("USD", "CAD"), ("CAD", "USD")];

/// Static degradation table used when the provider is down. Stale but
/// bounded error beats a missing rate for the valuation chain.
const FALLBACK_RATES: [(&str, &str, &str); 2] =
    [("USD", "CAD", "1.37"), ("CAD", "USD", "0.73")];

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("💱 Refreshing exchange rates for {target_date}...");

    let timestamp = Utc
        .from_utc_datetime(&target_date.and_hms_opt(0, 0, 0).expect("midnight exists"));

    let mut report = PipelineReport::default();

    for (from, to) in PAIRS {
        report.found += 1;

        let (rate, source) = match ctx.provider.fetch_fx_rate(from, to).await {
            Ok(rate) => (rate, "provider"),
            Err(e) => {
                warn!("FX provider failed for {from}/{to}: {e}; using fallback table");
                match fallback_rate(from, to) {
                    Some(rate) => (rate, "fallback"),
                    None => {
                        report.errors += 1;
                        continue;
                    }
                }
            }
        };

        match market_queries::upsert_exchange_rate(
            &ctx.stores.ops,
            from,
            to,
            &rate,
            timestamp,
            source,
        )
        .await
        {
            Ok(true) => report.new += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                warn!("❌ Failed to upsert rate {from}/{to}: {e}");
                report.errors += 1;
            }
        }
    }

    let message = report.message();
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: Vec::new(),
        message,
    })
}

fn fallback_rate(from: &str, to: &str) -> Option<BigDecimal> {
    FALLBACK_RATES
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .and_then(|(_, _, rate)| BigDecimal::from_str(rate).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_covers_configured_pairs() {
        for (from, to) in PAIRS {
            assert!(fallback_rate(from, to).is_some(), "no fallback for {from}/{to}");
        }
        assert!(fallback_rate("EUR", "JPY").is_none());
    }
}
