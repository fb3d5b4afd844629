use crate::external::price_provider::{
    ExternalDividend, ExternalPricePoint, MarketDataProvider, PriceProviderError,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::DateTime;
use serde::Deserialize;
use std::collections::HashMap;

pub struct YahooProvider {
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn range_for(days: u32) -> &'static str {
        if days <= 30 {
            "1mo"
        } else if days <= 180 {
            "6mo"
        } else {
            "1y"
        }
    }

    async fn fetch_chart(
        &self,
        symbol: &str,
        range: &str,
        with_events: bool,
    ) -> Result<YahooResult, PriceProviderError> {
        let mut url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?range={range}&interval=1d"
        );
        if with_events {
            url.push_str("&events=div");
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PriceProviderError::Network(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceProviderError::RateLimited);
        }
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PriceProviderError::NotFound);
        }

        let body = resp
            .json::<YahooChartResponse>()
            .await
            .map_err(|e| PriceProviderError::Parse(e.to_string()))?;

        body.chart
            .result
            .and_then(|mut r| r.pop())
            .ok_or_else(|| PriceProviderError::BadResponse("missing result".into()))
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

// Minimal response structs (only what we need)
#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
    #[serde(default)]
    events: Option<YahooEvents>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct YahooEvents {
    #[serde(default)]
    dividends: HashMap<String, YahooDividend>,
}

#[derive(Debug, Deserialize)]
struct YahooDividend {
    amount: f64,
    date: i64,
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let result = self
            .fetch_chart(ticker, Self::range_for(days), false)
            .await?;

        let closes = result
            .indicators
            .quote
            .first()
            .ok_or_else(|| PriceProviderError::BadResponse("missing quote".into()))?
            .close
            .clone();

        let mut out = Vec::new();

        // timestamp aligns with close list by index
        for (i, ts) in result.timestamp.iter().enumerate() {
            let Some(close) = closes.get(i).and_then(|v| *v) else {
                continue;
            };

            let dt = DateTime::from_timestamp(*ts, 0)
                .ok_or_else(|| PriceProviderError::Parse("bad timestamp".into()))?;
            let close = BigDecimal::from_f64(close)
                .ok_or_else(|| PriceProviderError::Parse("bad close".into()))?;

            out.push(ExternalPricePoint {
                date: dt.date_naive(),
                close,
            });
        }

        out.sort_by_key(|p| p.date);
        Ok(out)
    }

    /// FX pairs are quoted as synthetic tickers, e.g. USDCAD=X.
    async fn fetch_fx_rate(
        &self,
        from_currency: &str,
        to_currency: &str,
    ) -> Result<BigDecimal, PriceProviderError> {
        let symbol = format!("{from_currency}{to_currency}=X");
        let result = self.fetch_chart(&symbol, "5d", false).await?;

        let latest = result
            .indicators
            .quote
            .first()
            .and_then(|q| q.close.iter().rev().find_map(|c| *c))
            .ok_or_else(|| PriceProviderError::BadResponse("no close for fx pair".into()))?;

        BigDecimal::from_f64(latest)
            .ok_or_else(|| PriceProviderError::Parse("bad fx close".into()))
    }

    async fn fetch_dividends(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalDividend>, PriceProviderError> {
        let result = self
            .fetch_chart(ticker, Self::range_for(days), true)
            .await?;

        let mut out: Vec<ExternalDividend> = result
            .events
            .map(|e| e.dividends)
            .unwrap_or_default()
            .into_values()
            .filter_map(|d| {
                let dt = DateTime::from_timestamp(d.date, 0)?;
                Some(ExternalDividend {
                    ex_date: dt.date_naive(),
                    amount_per_share: BigDecimal::from_f64(d.amount)?,
                })
            })
            .collect();

        out.sort_by_key(|d| d.ex_date);
        Ok(out)
    }
}
