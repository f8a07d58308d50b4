//! Source adapters, one per provider, and the registry builder.
//!
//! Every adapter normalises its payload into [`OhlcvBar`] before returning;
//! nothing downstream branches on the provider's wire format.

pub mod analisistecnico;
pub mod byma;
pub mod iol;
pub mod yahoo;

use crate::domain::cascade::SourceRegistry;
use crate::domain::error::{CascadeError, FetchError};
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::settings::{EngineSettings, SourceSettings};
use crate::domain::source::SourceId;
use crate::ports::config_port::ConfigPort;
use crate::ports::source_port::SourceAdapter;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)";

pub(crate) fn http_client(settings: &SourceSettings) -> Result<reqwest::blocking::Client, CascadeError> {
    reqwest::blocking::Client::builder()
        .timeout(settings.timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| CascadeError::ConfigInvalid {
            section: format!("source.{}", settings.id),
            key: "timeout_secs".to_string(),
            reason: e.to_string(),
        })
}

fn send_error(e: &reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else {
        FetchError::Unavailable {
            reason: e.to_string(),
        }
    }
}

/// GETs `url`. `Ok(None)` means the provider answered that it has nothing
/// for this symbol.
pub(crate) fn get_text(
    client: &reqwest::blocking::Client,
    url: &str,
    timeout: Duration,
) -> Result<Option<String>, FetchError> {
    let resp = client.get(url).send().map_err(|e| send_error(&e, timeout))?;
    let status = resp.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited {
            reason: format!("HTTP {status}"),
        });
    }
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
        debug!(%url, %status, "symbol not found");
        return Ok(None);
    }
    if !status.is_success() {
        return Err(FetchError::Unavailable {
            reason: format!("HTTP {status}"),
        });
    }

    resp.text().map(Some).map_err(|e| send_error(&e, timeout))
}

pub(crate) fn unix_date(ts: i64) -> Result<NaiveDate, FetchError> {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| FetchError::ParseError {
            reason: format!("invalid timestamp: {ts}"),
        })
}

pub(crate) fn range_timestamps(range: DateRange) -> (i64, i64) {
    let start = range.start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    let end = range.end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() + 86_399;
    (start, end)
}

/// TradingView UDF `history` payload.
#[derive(Debug, Deserialize)]
struct UdfHistory {
    s: String,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    t: Vec<i64>,
    #[serde(default)]
    o: Vec<Option<f64>>,
    #[serde(default)]
    h: Vec<Option<f64>>,
    #[serde(default)]
    l: Vec<Option<f64>>,
    #[serde(default)]
    c: Vec<Option<f64>>,
    #[serde(default)]
    v: Vec<Option<f64>>,
}

/// Parses a UDF history body into bars in emission order. Repeated dates are
/// kept, numbered by `row_index` in order of appearance.
pub(crate) fn parse_udf(
    body: &str,
    ticker: &str,
    source: SourceId,
) -> Result<Vec<OhlcvBar>, FetchError> {
    // some UDF servers answer an unknown symbol with a bare array
    if body.trim_start().starts_with('[') {
        return Ok(Vec::new());
    }
    let data: UdfHistory = serde_json::from_str(body).map_err(|e| FetchError::ParseError {
        reason: e.to_string(),
    })?;

    match data.s.as_str() {
        "ok" => {}
        "no_data" => return Ok(Vec::new()),
        "error" => {
            return Err(FetchError::Unavailable {
                reason: data.errmsg.unwrap_or_else(|| "error status".to_string()),
            });
        }
        other => {
            return Err(FetchError::ParseError {
                reason: format!("unknown status '{other}'"),
            });
        }
    }

    let n = data.t.len();
    if [data.o.len(), data.h.len(), data.l.len(), data.c.len()]
        .iter()
        .any(|len| *len != n)
    {
        return Err(FetchError::ParseError {
            reason: "column lengths differ".to_string(),
        });
    }

    let mut seen: HashMap<NaiveDate, u32> = HashMap::new();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let (Some(open), Some(high), Some(low), Some(close)) =
            (data.o[i], data.h[i], data.l[i], data.c[i])
        else {
            continue;
        };
        let date = unix_date(data.t[i])?;
        let row_index = seen.entry(date).or_insert(0);
        let volume = data.v.get(i).copied().flatten().unwrap_or(0.0);
        bars.push(OhlcvBar {
            ticker: ticker.to_string(),
            date,
            open,
            high,
            low,
            close,
            volume: volume as i64,
            source,
            row_index: *row_index,
        });
        *row_index += 1;
    }
    Ok(bars)
}

/// Builds adapters for every source in the configured order.
pub fn build_registry(
    config: &dyn ConfigPort,
    settings: &EngineSettings,
) -> Result<SourceRegistry, CascadeError> {
    let mut registry = SourceRegistry::new();
    for &id in settings.priority.sources() {
        let slow = settings.is_slow(id);
        let source = SourceSettings::from_config(config, id, slow)?;
        let adapter: Box<dyn SourceAdapter> = match id {
            SourceId::Byma => Box::new(byma::BymaSource::new(&source)?),
            SourceId::Yahoo => Box::new(yahoo::YahooSource::new(&source)?),
            SourceId::AnalisisTecnico => {
                Box::new(analisistecnico::AnalisisTecnicoSource::new(&source)?)
            }
            SourceId::Iol => match iol::IolSource::from_settings(&source) {
                Some(adapter) => Box::new(adapter),
                None => {
                    warn!(source = %id, "no driver command configured, source disabled");
                    continue;
                }
            },
        };
        registry.register(adapter, source.limits, slow);
    }
    Ok(registry)
}
