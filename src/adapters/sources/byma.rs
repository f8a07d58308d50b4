//! Bolsas y Mercados Argentinos open-data history feed.

use super::{get_text, http_client, parse_udf, range_timestamps};
use crate::domain::error::{CascadeError, FetchError};
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::settings::SourceSettings;
use crate::domain::source::SourceId;
use crate::ports::source_port::SourceAdapter;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str =
    "https://open.bymadata.com.ar/vanoms-be-core/rest/api/bymadata/free";

/// Symbols are quoted with the T+1 settlement suffix.
const SETTLEMENT_SUFFIX: &str = "24HS";

pub struct BymaSource {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
}

impl BymaSource {
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

    fn history_url(&self, ticker: &str, range: DateRange) -> String {
        let (from, to) = range_timestamps(range);
        format!(
            "{}/chart/historical-series/history?symbol={ticker}+{SETTLEMENT_SUFFIX}&resolution=D&from={from}&to={to}",
            self.base_url.trim_end_matches('/')
        )
    }
}

impl SourceAdapter for BymaSource {
    fn id(&self) -> SourceId {
        SourceId::Byma
    }

    fn fetch(&self, ticker: &str, range: DateRange) -> Result<Vec<OhlcvBar>, FetchError> {
        let url = self.history_url(ticker, range);
        let Some(body) = get_text(&self.client, &url, self.timeout)? else {
            return Ok(Vec::new());
        };
        let mut bars = parse_udf(&body, ticker, SourceId::Byma)?;
        bars.retain(|b| range.contains(b.date));
        Ok(bars)
    }
}
