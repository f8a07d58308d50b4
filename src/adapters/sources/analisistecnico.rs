//! AnalisisTecnico datafeed. Returns the full history on every call and is
//! known to repeat timestamps; both are handled downstream.

use super::{get_text, http_client, parse_udf};
use crate::domain::error::{CascadeError, FetchError};
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::settings::SourceSettings;
use crate::domain::source::SourceId;
use crate::ports::source_port::SourceAdapter;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://analisistecnico.com.ar/services/datafeed";

pub struct AnalisisTecnicoSource {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
}

impl AnalisisTecnicoSource {
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
}

impl SourceAdapter for AnalisisTecnicoSource {
    fn id(&self) -> SourceId {
        SourceId::AnalisisTecnico
    }

    fn fetch(&self, ticker: &str, range: DateRange) -> Result<Vec<OhlcvBar>, FetchError> {
        let url = format!(
            "{}/history?symbol={ticker}&resolution=D",
            self.base_url.trim_end_matches('/')
        );
        let Some(body) = get_text(&self.client, &url, self.timeout)? else {
            return Ok(Vec::new());
        };
        let mut bars = parse_udf(&body, ticker, SourceId::AnalisisTecnico)?;
        bars.retain(|b| range.contains(b.date));
        Ok(bars)
    }
}
