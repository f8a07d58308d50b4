//! Instruments tracked by the store.

use crate::domain::error::CascadeError;
use crate::domain::source::SourceId;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Classification {
    Stock,
    Cedears,
    Bond,
}

impl Classification {
    pub const ALL: [Classification; 3] = [
        Classification::Stock,
        Classification::Cedears,
        Classification::Bond,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Stock => "STOCK",
            Classification::Cedears => "CEDEARS",
            Classification::Bond => "BOND",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STOCK" => Ok(Classification::Stock),
            "CEDEARS" | "CEDEAR" => Ok(Classification::Cedears),
            "BOND" => Ok(Classification::Bond),
            _ => Err(CascadeError::UnknownClassification(s.trim().to_string())),
        }
    }
}

/// Cached per-instrument summary, refreshed with every committed merge and
/// used for freshness checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentSummary {
    pub bars_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub data_source: Option<SourceId>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl InstrumentSummary {
    /// Span between the first and last canonical dates, in years of 365.25 days.
    pub fn years_of_data(&self) -> f64 {
        match (self.first_date, self.last_date) {
            (Some(first), Some(last)) => (last - first).num_days() as f64 / 365.25,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub id: i64,
    pub ticker: String,
    pub name: String,
    pub classification: Classification,
    pub settlement_type: Option<String>,
    pub enabled: bool,
    pub description: Option<String>,
    pub summary: InstrumentSummary,
}

impl Instrument {
    /// A bare instrument used when a ticker is requested explicitly but is
    /// not yet known to the store.
    pub fn ad_hoc(ticker: &str, classification: Classification) -> Self {
        Self {
            id: 0,
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            classification,
            settlement_type: None,
            enabled: true,
            description: None,
            summary: InstrumentSummary::default(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.summary.bars_count > 0
    }

    /// Holds some history, but less than `min_years` of it. Always false when
    /// `min_years` is zero.
    pub fn has_short_history(&self, min_years: f64) -> bool {
        min_years > 0.0 && self.has_data() && self.summary.years_of_data() < min_years
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_round_trips_through_str() {
        for c in Classification::ALL {
            assert_eq!(c.as_str().parse::<Classification>().unwrap(), c);
        }
        assert_eq!(
            "cedear".parse::<Classification>().unwrap(),
            Classification::Cedears
        );
    }

    #[test]
    fn unknown_classification() {
        assert!(matches!(
            "FUTURE".parse::<Classification>(),
            Err(CascadeError::UnknownClassification(s)) if s == "FUTURE"
        ));
    }

    #[test]
    fn classification_orders_stock_cedears_bond() {
        let mut v = vec![
            Classification::Bond,
            Classification::Stock,
            Classification::Cedears,
        ];
        v.sort();
        assert_eq!(v, Classification::ALL.to_vec());
    }

    #[test]
    fn years_of_data_spans_first_to_last() {
        let mut i = Instrument::ad_hoc("GGAL", Classification::Stock);
        assert_eq!(i.summary.years_of_data(), 0.0);
        assert!(!i.has_short_history(5.0));

        i.summary.bars_count = 500;
        i.summary.first_date = NaiveDate::from_ymd_opt(2022, 1, 1);
        i.summary.last_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!((i.summary.years_of_data() - 2.0).abs() < 0.01);
        assert!(i.has_short_history(5.0));
        assert!(!i.has_short_history(2.0 - 0.1));
        assert!(!i.has_short_history(0.0));
    }

    #[test]
    fn ad_hoc_instrument_is_enabled_and_empty() {
        let i = Instrument::ad_hoc("AL30", Classification::Bond);
        assert!(i.enabled);
        assert!(!i.has_data());
        assert_eq!(i.name, "AL30");
    }
}
