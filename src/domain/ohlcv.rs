//! Daily OHLCV bar representation and its soft invariants.

use crate::domain::source::SourceId;
use chrono::NaiveDate;
use std::fmt;

/// Row index of the canonical bar for an (instrument, date) pair.
pub const CANONICAL_ROW: u32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// Which source produced this exact row.
    pub source: SourceId,
    /// 0 for the canonical row, >0 for secondary rows a source emitted for
    /// the same date.
    pub row_index: u32,
}

impl OhlcvBar {
    pub fn is_canonical(&self) -> bool {
        self.row_index == CANONICAL_ROW
    }

    /// Checks `high >= max(open, close) >= min(open, close) >= low` and
    /// `volume >= 0`. Violations are reported, never rejected.
    pub fn anomalies(&self) -> Vec<BarAnomaly> {
        let mut found = Vec::new();
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            found.push(BarAnomaly::NonFinitePrice);
            return found;
        }
        let body_top = self.open.max(self.close);
        let body_bottom = self.open.min(self.close);
        if self.high < body_top {
            found.push(BarAnomaly::HighBelowBody);
        }
        if self.low > body_bottom {
            found.push(BarAnomaly::LowAboveBody);
        }
        if self.volume < 0 {
            found.push(BarAnomaly::NegativeVolume);
        }
        found
    }
}

/// Soft-invariant violation on a single bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarAnomaly {
    HighBelowBody,
    LowAboveBody,
    NegativeVolume,
    NonFinitePrice,
}

impl fmt::Display for BarAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BarAnomaly::HighBelowBody => "high below max(open, close)",
            BarAnomaly::LowAboveBody => "low above min(open, close)",
            BarAnomaly::NegativeVolume => "negative volume",
            BarAnomaly::NonFinitePrice => "non-finite price",
        };
        f.write_str(s)
    }
}

/// Inclusive date range requested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}
