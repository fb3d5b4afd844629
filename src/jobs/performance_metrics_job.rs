//! Per-fund valuation rollup in CAD with day-over-day return. USD
//! positions convert at the daily FX rate; rows with a blank or
//! unparseable currency are treated as CAD and logged for data-quality
//! follow-up.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::db::market_queries;
use crate::errors::AppError;
use crate::pipeline::PipelineReport;
use crate::scheduler::{JobContext, JobOutcome};

pub async fn run(ctx: &JobContext, target_date: NaiveDate) -> Result<JobOutcome, AppError> {
    info!("📊 Aggregating performance metrics for {target_date}...");

    let pool = &ctx.stores.ops;
    let positions = market_queries::positions_for_date(pool, target_date).await?;
    if positions.is_empty() {
        return Ok(JobOutcome {
            message: format!("no positions for {target_date}"),
            ..Default::default()
        });
    }

    let usd_cad = market_queries::rate_for_date(pool, "USD", "CAD", target_date).await?;
    if usd_cad.is_none() {
        warn!("No USD/CAD rate at {target_date}; USD positions valued at par");
    }

    let mut fund_totals: BTreeMap<String, BigDecimal> = BTreeMap::new();
    let mut report = PipelineReport::default();

    for position in &positions {
        report.found += 1;
        let value_cad = match normalize_currency(&position.currency) {
            Currency::Cad => position.market_value.clone(),
            Currency::Usd => match &usd_cad {
                Some(rate) => &position.market_value * rate,
                None => position.market_value.clone(),
            },
            Currency::UnknownDefaultedToCad => {
                warn!(
                    "Position {}/{} on {} has currency '{}'; defaulting to CAD",
                    position.fund, position.ticker, target_date, position.currency
                );
                position.market_value.clone()
            }
        };
        *fund_totals.entry(position.fund.clone()).or_default() += value_cad;
        report.record_ticker(&position.ticker);
    }

    let previous_day = ctx.calendar.recent_trading_days(target_date, 2).pop();

    for (fund, total) in &fund_totals {
        let daily_return_pct = match previous_day {
            Some(prev) if prev != target_date => {
                market_queries::fund_value_for_date(pool, fund, prev)
                    .await?
                    .and_then(|prev_value| daily_return(total, &prev_value))
            }
            _ => None,
        };

        match market_queries::upsert_performance_metric(
            pool,
            fund,
            target_date,
            total,
            daily_return_pct,
        )
        .await
        {
            Ok(true) => report.new += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                warn!("❌ Failed to upsert metrics for {fund}: {e}");
                report.errors += 1;
            }
        }
    }

    let message = report.message();
    Ok(JobOutcome {
        processed: report.new + report.duplicates,
        failed: report.errors,
        tickers: report.tickers,
        message,
    })
}

enum Currency {
    Cad,
    Usd,
    UnknownDefaultedToCad,
}

fn normalize_currency(raw: &str) -> Currency {
    match raw.trim().to_ascii_uppercase().as_str() {
        "CAD" => Currency::Cad,
        "USD" => Currency::Usd,
        _ => Currency::UnknownDefaultedToCad,
    }
}

fn daily_return(today: &BigDecimal, yesterday: &BigDecimal) -> Option<f64> {
    let today = today.to_f64()?;
    let yesterday = yesterday.to_f64()?;
    if yesterday == 0.0 {
        return None;
    }
    Some((today - yesterday) / yesterday * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_blank_and_nan_currency_default_to_cad() {
        assert!(matches!(normalize_currency(""), Currency::UnknownDefaultedToCad));
        assert!(matches!(normalize_currency("nan"), Currency::UnknownDefaultedToCad));
        assert!(matches!(normalize_currency(" cad "), Currency::Cad));
        assert!(matches!(normalize_currency("usd"), Currency::Usd));
    }

    #[test]
    fn test_daily_return() {
        let today = BigDecimal::from_str("110").unwrap();
        let yesterday = BigDecimal::from_str("100").unwrap();
        let ret = daily_return(&today, &yesterday).unwrap();
        assert!((ret - 10.0).abs() < 1e-9);

        let zero = BigDecimal::from_str("0").unwrap();
        assert!(daily_return(&today, &zero).is_none());
    }
}
