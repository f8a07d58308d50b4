//! Targeted repair of canonical rows known to come from a bad source.

use crate::domain::cascade::SourceAttempt;
use crate::domain::instrument::Classification;
use crate::domain::ohlcv::DateRange;
use crate::domain::source::SourceId;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;

/// Canonical rows from `source` on instruments of `classification` are
/// considered wrong and get re-resolved from the remaining sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairTarget {
    pub source: SourceId,
    pub classification: Classification,
}

impl fmt::Display for RepairTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows on {}", self.source, self.classification)
    }
}

/// Smallest range covering every targeted date.
pub fn span(targets: &BTreeSet<NaiveDate>) -> Option<DateRange> {
    let start = *targets.first()?;
    let end = *targets.last()?;
    Some(DateRange { start, end })
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentRepair {
    pub ticker: String,
    pub targeted: usize,
    pub repaired: BTreeSet<NaiveDate>,
    /// Targeted dates no alternate source could supply. Left as they were.
    pub unrepaired: BTreeSet<NaiveDate>,
    pub resolved_from: Option<SourceId>,
    pub attempts: Vec<SourceAttempt>,
    pub error: Option<String>,
}

impl InstrumentRepair {
    pub fn new(ticker: &str, targets: &BTreeSet<NaiveDate>) -> Self {
        Self {
            ticker: ticker.to_string(),
            targeted: targets.len(),
            repaired: BTreeSet::new(),
            unrepaired: targets.clone(),
            resolved_from: None,
            attempts: Vec::new(),
            error: None,
        }
    }

    /// Marks the dates the store actually rewrote; the rest stay unrepaired.
    pub fn settle(&mut self, targets: &BTreeSet<NaiveDate>, written: &BTreeSet<NaiveDate>) {
        self.repaired = targets.intersection(written).copied().collect();
        self.unrepaired = targets.difference(written).copied().collect();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    pub target: RepairTarget,
    pub instruments: Vec<InstrumentRepair>,
}

impl RepairReport {
    pub fn targeted(&self) -> usize {
        self.instruments.iter().map(|i| i.targeted).sum()
    }

    pub fn repaired(&self) -> usize {
        self.instruments.iter().map(|i| i.repaired.len()).sum()
    }

    pub fn unrepaired(&self) -> usize {
        self.instruments.iter().map(|i| i.unrepaired.len()).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.instruments.iter().any(|i| i.error.is_some())
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Repair: {} ===", self.target)?;
        writeln!(f, "Instruments:       {}", self.instruments.len())?;
        writeln!(f, "Rows targeted:     {}", self.targeted())?;
        writeln!(f, "Rows repaired:     {}", self.repaired())?;
        writeln!(f, "Rows unrepaired:   {}", self.unrepaired())?;
        for i in &self.instruments {
            let from = i
                .resolved_from
                .map(|s| s.as_str())
                .unwrap_or("-");
            write!(
                f,
                "  {:10} {:>5}/{:<5} from {}",
                i.ticker,
                i.repaired.len(),
                i.targeted,
                from
            )?;
            if let Some(e) = &i.error {
                write!(f, " error: {e}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
