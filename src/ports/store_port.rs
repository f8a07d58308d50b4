//! Store port: the relational time-series store shared by every run.

use crate::domain::catalog::CatalogEntry;
use crate::domain::error::CascadeError;
use crate::domain::instrument::{Classification, Instrument};
use crate::domain::merge::{CommitOutcome, MergeMode};
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::report::DownloadRecord;
use crate::domain::source::{SourceId, SourcePriority};
use crate::domain::status::StoreStatus;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

pub trait StorePort: Send + Sync {
    /// Human-readable location, for status output.
    fn location(&self) -> String;

    /// Every instrument, ordered by ticker.
    fn list_instruments(&self) -> Result<Vec<Instrument>, CascadeError>;

    fn enabled_instruments(&self) -> Result<Vec<Instrument>, CascadeError> {
        Ok(self
            .list_instruments()?
            .into_iter()
            .filter(|i| i.enabled)
            .collect())
    }

    fn get_instrument(&self, ticker: &str) -> Result<Option<Instrument>, CascadeError>;

    /// Inserts a catalog entry as a new instrument. Fails if the ticker exists.
    fn insert_instrument(&self, entry: &CatalogEntry) -> Result<Instrument, CascadeError>;

    /// Canonical rows for one instrument, ordered by date.
    fn canonical_bars(&self, ticker: &str) -> Result<Vec<OhlcvBar>, CascadeError>;

    /// Merges `fetched` (already canonicalized) against the stored canonical
    /// rows, refreshes the instrument summary and appends `record` to the
    /// download log with `bars_stored` set to the rows written.
    /// All-or-nothing per call.
    fn commit_merge(
        &self,
        ticker: &str,
        fetched: &[OhlcvBar],
        mode: &MergeMode,
        priority: &SourcePriority,
        record: &DownloadRecord,
    ) -> Result<CommitOutcome, CascadeError>;

    /// Appends a download-log row for a run that wrote nothing.
    fn record_download(&self, record: &DownloadRecord) -> Result<(), CascadeError>;

    /// Canonical row dates whose provenance is `source`, grouped by ticker,
    /// for instruments of `classification`.
    fn rows_from_source(
        &self,
        classification: Classification,
        source: SourceId,
    ) -> Result<BTreeMap<String, BTreeSet<NaiveDate>>, CascadeError>;

    fn status(&self) -> Result<StoreStatus, CascadeError>;
}
