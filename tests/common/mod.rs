#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use ohlcv_cascade::adapters::sqlite_store::SqliteStore;
use ohlcv_cascade::domain::calendar::FreshnessPolicy;
use ohlcv_cascade::domain::cascade::SourceRegistry;
use ohlcv_cascade::domain::catalog::CatalogEntry;
use ohlcv_cascade::domain::error::{CascadeError, FetchError};
use ohlcv_cascade::domain::instrument::{Classification, Instrument};
use ohlcv_cascade::domain::merge::{CommitOutcome, MergeMode};
use ohlcv_cascade::domain::report::DownloadRecord;
pub use ohlcv_cascade::domain::ohlcv::{DateRange, OhlcvBar};
use ohlcv_cascade::domain::settings::EngineSettings;
use ohlcv_cascade::domain::status::StoreStatus;
pub use ohlcv_cascade::domain::source::{SourceId, SourcePriority};
use ohlcv_cascade::domain::throttle::GateLimits;
use ohlcv_cascade::ports::source_port::SourceAdapter;
use ohlcv_cascade::ports::store_port::StorePort;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub type CallLog = Arc<Mutex<Vec<(String, DateRange)>>>;

/// Scripted source. Per-ticker responses fall back to `default`, which is an
/// empty answer unless overridden. Returned bars are clipped to the
/// requested range, as the real adapters do.
pub struct MockSource {
    id: SourceId,
    responses: HashMap<String, Result<Vec<OhlcvBar>, FetchError>>,
    default: Result<Vec<OhlcvBar>, FetchError>,
    calls: CallLog,
}

impl MockSource {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            responses: HashMap::new(),
            default: Ok(Vec::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_bars(mut self, ticker: &str, bars: Vec<OhlcvBar>) -> Self {
        self.responses.insert(ticker.to_string(), Ok(bars));
        self
    }

    pub fn with_error(mut self, ticker: &str, error: FetchError) -> Self {
        self.responses.insert(ticker.to_string(), Err(error));
        self
    }

    pub fn failing(mut self, error: FetchError) -> Self {
        self.default = Err(error);
        self
    }

    pub fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }
}

impl SourceAdapter for MockSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn fetch(&self, ticker: &str, range: DateRange) -> Result<Vec<OhlcvBar>, FetchError> {
        self.calls.lock().push((ticker.to_string(), range));
        let response = self.responses.get(ticker).unwrap_or(&self.default);
        response.clone().map(|bars| {
            bars.into_iter()
                .filter(|b| range.contains(b.date))
                .collect()
        })
    }
}

pub fn tickers_called(log: &CallLog) -> Vec<String> {
    log.lock().iter().map(|(t, _)| t.clone()).collect()
}

pub fn registry(sources: Vec<MockSource>) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(Box::new(source), GateLimits::unbounded(), false);
    }
    registry
}

pub fn unavailable() -> FetchError {
    FetchError::Unavailable {
        reason: "connection refused".to_string(),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Friday. Most scenarios run "today" on this date.
pub fn today() -> NaiveDate {
    date(2024, 3, 15)
}

pub fn make_bar(ticker: &str, day: NaiveDate, close: f64, source: SourceId) -> OhlcvBar {
    OhlcvBar {
        ticker: ticker.to_string(),
        date: day,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000,
        source,
        row_index: 0,
    }
}

/// `count` consecutive weekdays starting at `start`, closes rising by one.
pub fn weekday_bars(
    ticker: &str,
    start: NaiveDate,
    count: usize,
    start_price: f64,
    source: SourceId,
) -> Vec<OhlcvBar> {
    let mut bars = Vec::with_capacity(count);
    let mut day = start;
    while bars.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            bars.push(make_bar(ticker, day, start_price + bars.len() as f64, source));
        }
        day = day.succ_opt().unwrap();
    }
    bars
}

pub fn store() -> SqliteStore {
    let store = SqliteStore::in_memory().unwrap();
    store.initialize_schema().unwrap();
    store
}

pub fn seed_instrument(store: &SqliteStore, ticker: &str, class: Classification) -> Instrument {
    store
        .insert_instrument(&CatalogEntry::new(ticker, class))
        .unwrap()
}

pub fn settings(order: &[SourceId]) -> EngineSettings {
    EngineSettings {
        priority: SourcePriority::new(order.to_vec()),
        slow: Vec::new(),
        freshness: FreshnessPolicy::default(),
        history_start: date(2024, 1, 1),
        workers: 2,
        include_empty: true,
        min_years: 0.0,
        repair: None,
    }
}

pub fn canonical(store: &SqliteStore, ticker: &str) -> Vec<OhlcvBar> {
    store.canonical_bars(ticker).unwrap()
}

/// Wraps a real store and fails every write touching one ticker, either with
/// an unreachable-database error or with a recoverable query error.
pub struct FailingStore {
    pub inner: SqliteStore,
    ticker: String,
    fatal: bool,
}

impl FailingStore {
    pub fn unavailable(inner: SqliteStore, ticker: &str) -> Self {
        Self {
            inner,
            ticker: ticker.to_string(),
            fatal: true,
        }
    }

    pub fn rejecting(inner: SqliteStore, ticker: &str) -> Self {
        Self {
            inner,
            ticker: ticker.to_string(),
            fatal: false,
        }
    }

    fn check(&self, ticker: &str) -> Result<(), CascadeError> {
        if ticker != self.ticker {
            return Ok(());
        }
        Err(if self.fatal {
            CascadeError::StorageUnavailable {
                reason: "unable to open database file".to_string(),
            }
        } else {
            CascadeError::DatabaseQuery {
                reason: "CHECK constraint failed".to_string(),
            }
        })
    }
}

impl StorePort for FailingStore {
    fn location(&self) -> String {
        self.inner.location()
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, CascadeError> {
        self.inner.list_instruments()
    }

    fn get_instrument(&self, ticker: &str) -> Result<Option<Instrument>, CascadeError> {
        self.inner.get_instrument(ticker)
    }

    fn insert_instrument(&self, entry: &CatalogEntry) -> Result<Instrument, CascadeError> {
        self.check(&entry.ticker)?;
        self.inner.insert_instrument(entry)
    }

    fn canonical_bars(&self, ticker: &str) -> Result<Vec<OhlcvBar>, CascadeError> {
        self.inner.canonical_bars(ticker)
    }

    fn commit_merge(
        &self,
        ticker: &str,
        fetched: &[OhlcvBar],
        mode: &MergeMode,
        priority: &SourcePriority,
        record: &DownloadRecord,
    ) -> Result<CommitOutcome, CascadeError> {
        self.check(ticker)?;
        self.inner.commit_merge(ticker, fetched, mode, priority, record)
    }

    fn record_download(&self, record: &DownloadRecord) -> Result<(), CascadeError> {
        self.check(&record.ticker)?;
        self.inner.record_download(record)
    }

    fn rows_from_source(
        &self,
        classification: Classification,
        source: SourceId,
    ) -> Result<BTreeMap<String, BTreeSet<NaiveDate>>, CascadeError> {
        self.inner.rows_from_source(classification, source)
    }

    fn status(&self) -> Result<StoreStatus, CascadeError> {
        self.inner.status()
    }
}
