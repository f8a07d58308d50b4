//! Yahoo Finance v8 chart API, Buenos Aires listings (`<TICKER>.BA`).

use super::{get_text, http_client, range_timestamps, unix_date};
use crate::domain::error::{CascadeError, FetchError};
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::settings::SourceSettings;
use crate::domain::source::SourceId;
use crate::ports::source_port::SourceAdapter;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

const MARKET_SUFFIX: &str = ".BA";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooSource {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
}

impl YahooSource {
    pub fn new(settings: &SourceSettings) -> Result<Self, CascadeError> {
        Ok(Self {
            client: http_client(settings)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: settings.timeout,
        })
    }

    fn chart_url(&self, ticker: &str, range: DateRange) -> String {
        let (start_ts, end_ts) = range_timestamps(range);
        format!(
            "{}/{ticker}{MARKET_SUFFIX}?period1={start_ts}&period2={end_ts}&interval=1d",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Rows with any missing price are dropped; Yahoo pads halted sessions
/// with nulls.
fn parse_chart(body: &str, ticker: &str) -> Result<Vec<OhlcvBar>, FetchError> {
    let resp: ChartResponse = serde_json::from_str(body).map_err(|e| FetchError::ParseError {
        reason: e.to_string(),
    })?;

    if let Some(err) = resp.chart.error {
        if err.code == "Not Found" {
            return Ok(Vec::new());
        }
        return Err(FetchError::Unavailable {
            reason: format!("{}: {}", err.code, err.description),
        });
    }

    let Some(data) = resp.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::ParseError {
            reason: "no quote data".to_string(),
        })?;

    let mut bars = Vec::with_capacity(timestamps.len());
    let mut skipped = 0usize;
    for (i, &ts) in timestamps.iter().enumerate() {
        let at = |col: &Vec<Option<f64>>| col.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) =
            (at(&quote.open), at(&quote.high), at(&quote.low), at(&quote.close))
        else {
            skipped += 1;
            continue;
        };
        bars.push(OhlcvBar {
            ticker: ticker.to_string(),
            date: unix_date(ts)?,
            open,
            high,
            low,
            close,
            volume: at(&quote.volume).unwrap_or(0.0) as i64,
            source: SourceId::Yahoo,
            row_index: 0,
        });
    }
    if skipped > 0 {
        debug!(%ticker, skipped, "dropped rows with null prices");
    }
    Ok(bars)
}

impl SourceAdapter for YahooSource {
    fn id(&self) -> SourceId {
        SourceId::Yahoo
    }

    fn fetch(&self, ticker: &str, range: DateRange) -> Result<Vec<OhlcvBar>, FetchError> {
        let url = self.chart_url(ticker, range);
        let Some(body) = get_text(&self.client, &url, self.timeout)? else {
            return Ok(Vec::new());
        };
        let mut bars = parse_chart(&body, ticker)?;
        bars.retain(|b| range.contains(b.date));
        Ok(bars)
    }
}
