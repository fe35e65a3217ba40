//! Yahoo Finance chart client for intraday bars and last prices.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::models::{Bar, InstrumentProfile, Quote};

use super::feed::{DataError, MarketData};
use super::types::*;

const CHART_API_BASE: &str = "https://query2.finance.yahoo.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Client for the Yahoo v8 chart endpoint (read-only).
pub struct DataClient {
    client: Client,
    base_url: String,
    /// Canonical symbol → feed symbol
    feed_symbols: HashMap<String, String>,
    /// Bar interval, e.g. "5m"
    interval: String,
    /// History range, e.g. "5d"
    range: String,
}

impl DataClient {
    /// Create a client for the given instruments.
    pub fn new(profiles: &[InstrumentProfile], interval: &str, range: &str) -> Result<Self> {
        Self::with_base_url(CHART_API_BASE.to_string(), profiles, interval, range)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(
        base_url: String,
        profiles: &[InstrumentProfile],
        interval: &str,
        range: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let feed_symbols = profiles
            .iter()
            .map(|p| (p.symbol.clone(), p.feed_symbol.clone()))
            .collect();

        Ok(Self {
            client,
            base_url,
            feed_symbols,
            interval: interval.to_string(),
            range: range.to_string(),
        })
    }

    fn feed_symbol(&self, instrument: &str) -> Result<&str, DataError> {
        self.feed_symbols
            .get(instrument)
            .map(String::as_str)
            .ok_or_else(|| DataError::UnknownInstrument(instrument.to_string()))
    }

    async fn fetch_chart(&self, instrument: &str) -> Result<ChartData, DataError> {
        let symbol = self.feed_symbol(instrument)?;
        let url = format!(
            "{}/v8/finance/chart/{}?interval={}&range={}",
            self.base_url, symbol, self.interval, self.range
        );

        debug!(url = %url, "Fetching chart");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                DataError::Timeout(DEFAULT_TIMEOUT)
            } else {
                DataError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DataError::NoData {
                instrument: instrument.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Http(format!("{} - {}", status, body)));
        }

        let chart: ChartResponse = response
            .json()
            .await
            .map_err(|e| DataError::Format(e.to_string()))?;

        first_result(instrument, chart)
    }
}

impl MarketData for DataClient {
    async fn recent_bars(&self, instrument: &str, count: usize) -> Result<Vec<Bar>, DataError> {
        let data = self.fetch_chart(instrument).await?;
        let mut bars = parse_bars(instrument, data)?;
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
        Ok(bars)
    }

    async fn live_quote(&self, instrument: &str) -> Result<Quote, DataError> {
        let data = self.fetch_chart(instrument).await?;
        parse_quote(instrument, &data)
    }
}

fn first_result(instrument: &str, chart: ChartResponse) -> Result<ChartData, DataError> {
    let results = chart.chart.result.ok_or_else(|| match chart.chart.error {
        Some(err) if err.code == "Not Found" => DataError::NoData {
            instrument: instrument.to_string(),
        },
        Some(err) => DataError::Format(format!("{}: {}", err.code, err.description)),
        None => DataError::Format("empty result with no error".into()),
    })?;

    results
        .into_iter()
        .next()
        .ok_or_else(|| DataError::Format("result array is empty".into()))
}

/// Turn a chart payload into bars, skipping rows with any missing price.
fn parse_bars(instrument: &str, data: ChartData) -> Result<Vec<Bar>, DataError> {
    let timestamps = data
        .timestamp
        .ok_or_else(|| DataError::NoData {
            instrument: instrument.to_string(),
        })?;

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::Format("no quote data".into()))?;

    let bars: Vec<Bar> = timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let timestamp = DateTime::from_timestamp(ts, 0)?;
            let open = quote.open.get(i).copied().flatten()?;
            let high = quote.high.get(i).copied().flatten()?;
            let low = quote.low.get(i).copied().flatten()?;
            let close = quote.close.get(i).copied().flatten()?;
            Some(Bar::new(timestamp, open, high, low, close))
        })
        .collect();

    if bars.is_empty() {
        return Err(DataError::NoData {
            instrument: instrument.to_string(),
        });
    }
    Ok(bars)
}

/// The chart endpoint only exposes a last price, so bid and ask coincide.
fn parse_quote(instrument: &str, data: &ChartData) -> Result<Quote, DataError> {
    let price = data
        .meta
        .regular_market_price
        .filter(|p| p.is_finite() && *p > 0.0)
        .and_then(Decimal::from_f64)
        .ok_or_else(|| DataError::NoData {
            instrument: instrument.to_string(),
        })?;

    let timestamp = data
        .meta
        .regular_market_time
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .unwrap_or_else(Utc::now);

    Ok(Quote {
        bid: price,
        ask: price,
        timestamp,
    })
}
