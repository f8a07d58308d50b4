//! Read-only view of what the store currently holds.

use crate::domain::instrument::Classification;
use crate::domain::source::SourceId;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationStatus {
    pub enabled: usize,
    pub disabled: usize,
    pub with_data: usize,
    pub bars: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
    pub by_classification: BTreeMap<Classification, ClassificationStatus>,
    pub canonical_bars: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Instruments whose summary names each source as last provider.
    pub instruments_by_source: BTreeMap<SourceId, usize>,
    pub download_log_rows: usize,
}

impl StoreStatus {
    pub fn instruments(&self) -> usize {
        self.by_classification
            .values()
            .map(|c| c.enabled + c.disabled)
            .sum()
    }

    pub fn with_data(&self) -> usize {
        self.by_classification.values().map(|c| c.with_data).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub store: StoreStatus,
    pub store_location: String,
    pub catalog_location: Option<String>,
    pub catalog_present: bool,
    pub site_location: Option<String>,
    pub site_present: bool,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.store;
        writeln!(f, "=== Store Status ===")?;
        writeln!(f, "Store:             {}", self.store_location)?;
        if let Some(loc) = &self.catalog_location {
            let mark = if self.catalog_present { "" } else { " (missing)" };
            writeln!(f, "Catalog:           {loc}{mark}")?;
        }
        if let Some(loc) = &self.site_location {
            let mark = if self.site_present { "" } else { " (not built)" };
            writeln!(f, "Site:              {loc}{mark}")?;
        }
        writeln!(
            f,
            "Instruments:       {} ({} with data)",
            s.instruments(),
            s.with_data()
        )?;
        writeln!(
            f,
            "{:10} {:>8} {:>9} {:>10} {:>10}",
            "class", "enabled", "disabled", "with_data", "bars"
        )?;
        for (class, c) in &s.by_classification {
            writeln!(
                f,
                "{:10} {:>8} {:>9} {:>10} {:>10}",
                class.as_str(),
                c.enabled,
                c.disabled,
                c.with_data,
                c.bars
            )?;
        }
        writeln!(f, "Canonical bars:    {}", s.canonical_bars)?;
        match (s.first_date, s.last_date) {
            (Some(first), Some(last)) => writeln!(f, "Date range:        {first} .. {last}")?,
            _ => writeln!(f, "Date range:        (empty)")?,
        }
        for (source, n) in &s.instruments_by_source {
            writeln!(f, "  {:18} {}", source.as_str(), n)?;
        }
        writeln!(f, "Download log rows: {}", s.download_log_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_classifications() {
        let mut s = StoreStatus::default();
        s.by_classification.insert(
            Classification::Stock,
            ClassificationStatus {
                enabled: 3,
                disabled: 1,
                with_data: 2,
                bars: 40,
            },
        );
        s.by_classification.insert(
            Classification::Bond,
            ClassificationStatus {
                enabled: 2,
                disabled: 0,
                with_data: 2,
                bars: 10,
            },
        );
        assert_eq!(s.instruments(), 6);
        assert_eq!(s.with_data(), 4);
    }

    #[test]
    fn display_marks_missing_catalog() {
        let report = StatusReport {
            store_location: ":memory:".into(),
            catalog_location: Some("tickers.csv".into()),
            catalog_present: false,
            ..StatusReport::default()
        };
        let text = report.to_string();
        assert!(text.contains("tickers.csv (missing)"));
        assert!(text.contains("(empty)"));
    }
}
