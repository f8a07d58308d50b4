//! Per-instrument outcomes and the aggregate run report.

use crate::domain::cascade::SourceAttempt;
use crate::domain::source::SourceId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// One row of the download log.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub ticker: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: DownloadStatus,
    pub bars_found: usize,
    pub bars_stored: usize,
    pub error_msg: Option<String>,
    pub source: Option<SourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Ok,
    Empty,
    Error,
    Repair,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Ok => "ok",
            DownloadStatus::Empty => "empty",
            DownloadStatus::Error => "error",
            DownloadStatus::Repair => "repair",
        }
    }
}

/// Terminal outcome for one instrument in a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    /// A source returned bars and at least one canonical row was written.
    Succeeded { source: SourceId },
    /// Skipped: the stored data is already current.
    Fresh,
    /// Some source answered but nothing new reached the store.
    NoNewData,
    /// Every source in the order failed.
    FailedAllSources,
    /// Bars were fetched but the store rejected the commit.
    StoreFailed(String),
    /// The run was cancelled before this instrument started.
    Cancelled,
}

impl Outcome {
    /// Key used when counting outcomes in the summary.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded { .. } => "succeeded",
            Outcome::Fresh => "fresh",
            Outcome::NoNewData => "no_new_data",
            Outcome::FailedAllSources => "failed_all_sources",
            Outcome::StoreFailed(_) => "store_failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded { source } => write!(f, "succeeded ({source})"),
            Outcome::StoreFailed(reason) => write!(f, "store failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReport {
    pub ticker: String,
    pub outcome: Outcome,
    pub bars_written: usize,
    pub duplicates_dropped: usize,
    /// Bars committed despite failing a soft invariant.
    pub anomalies: usize,
    pub attempts: Vec<SourceAttempt>,
    /// Canonical rows held for the instrument after the run.
    pub canonical_bars: usize,
    /// Years between the first and last canonical dates after the run.
    pub history_years: f64,
}

impl InstrumentReport {
    pub fn new(ticker: &str, outcome: Outcome) -> Self {
        Self {
            ticker: ticker.to_string(),
            outcome,
            bars_written: 0,
            duplicates_dropped: 0,
            anomalies: 0,
            attempts: Vec::new(),
            canonical_bars: 0,
            history_years: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub counts: BTreeMap<&'static str, usize>,
    pub by_source: BTreeMap<SourceId, usize>,
    pub bars_written: usize,
    pub duplicates_dropped: usize,
    pub anomalies: usize,
    /// Instruments still holding zero canonical rows after the run.
    pub zero_data: Vec<String>,
    /// Instruments with some data but less history than the run's minimum.
    pub partial: Vec<String>,
}

/// Everything a run did, in selection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub instruments: Vec<InstrumentReport>,
    /// Minimum history depth, in years, below which an instrument counts as
    /// partial. Zero disables the count.
    pub min_years: f64,
}

impl RunReport {
    pub fn new(instruments: Vec<InstrumentReport>) -> Self {
        Self {
            instruments,
            min_years: 0.0,
        }
    }

    pub fn with_min_years(mut self, min_years: f64) -> Self {
        self.min_years = min_years;
        self
    }

    pub fn get(&self, ticker: &str) -> Option<&InstrumentReport> {
        self.instruments.iter().find(|r| r.ticker == ticker)
    }

    pub fn summary(&self) -> RunSummary {
        let mut s = RunSummary::default();
        for r in &self.instruments {
            *s.counts.entry(r.outcome.label()).or_insert(0) += 1;
            if let Outcome::Succeeded { source } = r.outcome {
                *s.by_source.entry(source).or_insert(0) += 1;
            }
            s.bars_written += r.bars_written;
            s.duplicates_dropped += r.duplicates_dropped;
            s.anomalies += r.anomalies;
            if r.canonical_bars == 0 && r.outcome != Outcome::Cancelled {
                s.zero_data.push(r.ticker.clone());
            } else if self.min_years > 0.0
                && r.canonical_bars > 0
                && r.history_years < self.min_years
            {
                s.partial.push(r.ticker.clone());
            }
        }
        s
    }

    pub fn count(&self, label: &str) -> usize {
        self.instruments
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }

    /// Any instrument ended with every source failing or a rejected commit.
    pub fn has_failures(&self) -> bool {
        self.instruments.iter().any(|r| {
            matches!(
                r.outcome,
                Outcome::FailedAllSources | Outcome::StoreFailed(_)
            )
        })
    }

    pub fn was_cancelled(&self) -> bool {
        self.instruments
            .iter()
            .any(|r| r.outcome == Outcome::Cancelled)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary();
        writeln!(f, "=== Run Summary ===")?;
        writeln!(f, "Instruments:       {}", self.instruments.len())?;
        for (label, n) in &s.counts {
            writeln!(f, "  {label:18} {n}")?;
        }
        writeln!(f, "Bars written:      {}", s.bars_written)?;
        if s.duplicates_dropped > 0 {
            writeln!(f, "Duplicates dropped: {}", s.duplicates_dropped)?;
        }
        if s.anomalies > 0 {
            writeln!(f, "Anomalous bars:    {}", s.anomalies)?;
        }
        if !s.by_source.is_empty() {
            writeln!(f, "Resolved by source:")?;
            for (source, n) in &s.by_source {
                writeln!(f, "  {:18} {}", source.as_str(), n)?;
            }
        }
        for r in &self.instruments {
            if matches!(
                r.outcome,
                Outcome::FailedAllSources | Outcome::StoreFailed(_)
            ) {
                let tried: Vec<String> = r.attempts.iter().map(|a| a.to_string()).collect();
                writeln!(f, "  x {}: {} [{}]", r.ticker, r.outcome, tried.join("; "))?;
            }
        }
        if !s.zero_data.is_empty() {
            writeln!(f, "Zero data: {}", s.zero_data.join(", "))?;
        }
        if !s.partial.is_empty() {
            writeln!(
                f,
                "Partial (< {} yr): {} [{}]",
                self.min_years,
                s.partial.len(),
                s.partial.join(", ")
            )?;
        }
        Ok(())
    }
}
