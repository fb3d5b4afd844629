//! Deterministic synthetic fixtures for local development: two funds, six
//! open lots, two benchmark series and a week of FX. Safe to re-run; every
//! write is an upsert on the natural key.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::db::{market_queries, Stores};
use crate::models::BenchmarkBar;

const FUNDS: [&str; 2] = ["core-fund", "speculative-fund"];

const LOTS: [(&str, &str, &str, &str); 6] = [
    ("core-fund", "AAPL", "25", "USD"),
    ("core-fund", "MSFT", "10", "USD"),
    ("core-fund", "RY.TO", "40", "CAD"),
    ("speculative-fund", "NVDA", "8", "USD"),
    ("speculative-fund", "SHOP.TO", "15", "CAD"),
    ("speculative-fund", "TSLA", "5", "USD"),
];

pub async fn run(stores: &Stores) -> anyhow::Result<()> {
    info!("Writing synthetic fixtures...");
    let pool = &stores.ops;

    for fund in FUNDS {
        sqlx::query(
            r#"
            INSERT INTO funds (name, is_production)
            VALUES ($1, TRUE)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(fund)
        .execute(pool)
        .await?;
    }

    for (fund, ticker, shares, currency) in LOTS {
        sqlx::query(
            r#"
            INSERT INTO trades (id, fund, ticker, shares, currency, is_open)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (fund, ticker) DO UPDATE SET
                shares = EXCLUDED.shares, currency = EXCLUDED.currency, is_open = TRUE
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(fund)
        .bind(ticker)
        .bind(BigDecimal::from_str(shares)?)
        .bind(currency)
        .execute(pool)
        .await?;
    }

    let today = Utc::now().date_naive();
    for (benchmark, base) in [("SP500", 5_300.0), ("TSX", 22_100.0)] {
        for offset in 0..5i64 {
            let date = today - Duration::days(offset);
            // A gentle deterministic drift keeps charts non-flat
            let close = base + (offset as f64) * 7.5;
            let bar = BenchmarkBar {
                id: Uuid::new_v4(),
                benchmark: benchmark.to_string(),
                date,
                close: BigDecimal::from_str(&format!("{close:.2}"))?,
            };
            market_queries::upsert_benchmark_bar(pool, &bar).await?;
        }
    }

    let usd_cad = BigDecimal::from_str("1.37")?;
    let cad_usd = BigDecimal::from_str("0.73")?;
    for offset in 0..7i64 {
        let day = today - Duration::days(offset);
        let ts = day
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_utc();
        market_queries::upsert_exchange_rate(pool, "USD", "CAD", &usd_cad, ts, "fallback").await?;
        market_queries::upsert_exchange_rate(pool, "CAD", "USD", &cad_usd, ts, "fallback").await?;
    }

    info!("✅ Synthetic fixtures written: {} funds, {} lots", FUNDS.len(), LOTS.len());
    Ok(())
}
