//! Catalog synchronizer: diffs the authoritative instrument list against the
//! store's instrument table.
//!
//! Sync is additive only. Instruments missing from the catalog are reported
//! but never disabled or deleted; that stays a manual decision.

use crate::domain::instrument::{Classification, Instrument};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// One row of the catalog file.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: Option<i64>,
    pub ticker: String,
    pub name: String,
    pub classification: Classification,
    pub settlement_type: Option<String>,
    pub enabled: bool,
    pub description: Option<String>,
}

impl CatalogEntry {
    pub fn new(ticker: &str, classification: Classification) -> Self {
        Self {
            id: None,
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            classification,
            settlement_type: None,
            enabled: true,
            description: None,
        }
    }
}

impl From<&Instrument> for CatalogEntry {
    fn from(i: &Instrument) -> Self {
        Self {
            id: Some(i.id),
            ticker: i.ticker.clone(),
            name: i.name.clone(),
            classification: i.classification,
            settlement_type: i.settlement_type.clone(),
            enabled: i.enabled,
            description: i.description.clone(),
        }
    }
}

/// Same ticker, different classification. Halts sync for that ticker only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConflict {
    pub ticker: String,
    pub catalog: Classification,
    pub existing: Classification,
}

impl fmt::Display for SyncConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: catalog says {}, store says {}",
            self.ticker, self.catalog, self.existing
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub additions: Vec<CatalogEntry>,
    pub conflicts: Vec<SyncConflict>,
    /// Catalog tickers already present with a matching classification.
    pub unchanged: Vec<String>,
    /// Store tickers absent from the catalog. Left untouched.
    pub missing_from_catalog: Vec<String>,
}

pub fn plan_sync(catalog: &[CatalogEntry], existing: &[Instrument]) -> SyncPlan {
    let known: HashMap<&str, Classification> = existing
        .iter()
        .map(|i| (i.ticker.as_str(), i.classification))
        .collect();

    let mut plan = SyncPlan::default();
    // first row for a ticker wins; a later row disagreeing on class is a conflict
    let mut seen: BTreeMap<&str, Classification> = BTreeMap::new();

    for entry in catalog {
        let ticker = entry.ticker.as_str();
        if let Some(first) = seen.get(ticker) {
            if *first != entry.classification {
                plan.conflicts.push(SyncConflict {
                    ticker: ticker.to_string(),
                    catalog: entry.classification,
                    existing: *first,
                });
            }
            continue;
        }
        seen.insert(ticker, entry.classification);

        match known.get(ticker) {
            None => plan.additions.push(entry.clone()),
            Some(c) if *c == entry.classification => plan.unchanged.push(ticker.to_string()),
            Some(c) => plan.conflicts.push(SyncConflict {
                ticker: ticker.to_string(),
                catalog: entry.classification,
                existing: *c,
            }),
        }
    }

    // a conflicted ticker is neither inserted nor counted as unchanged
    let conflicted: BTreeSet<String> = plan.conflicts.iter().map(|c| c.ticker.clone()).collect();
    plan.additions.retain(|e| !conflicted.contains(&e.ticker));
    plan.unchanged.retain(|t| !conflicted.contains(t));

    plan.missing_from_catalog = existing
        .iter()
        .filter(|i| !seen.contains_key(i.ticker.as_str()))
        .map(|i| i.ticker.clone())
        .collect();
    plan.missing_from_catalog.sort();

    plan
}

/// Outcome of the table-update half of a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub catalog_rows: usize,
    pub added: Vec<Instrument>,
    pub conflicts: Vec<SyncConflict>,
    pub unchanged: usize,
    pub missing_from_catalog: Vec<String>,
    /// Tickers whose insert failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Tickers queued for resolution after the diff.
    pub queued: Vec<String>,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Catalog Sync ===")?;
        writeln!(f, "Catalog rows:      {}", self.catalog_rows)?;
        writeln!(f, "Added:             {}", self.added.len())?;
        writeln!(f, "Unchanged:         {}", self.unchanged)?;
        writeln!(f, "Conflicts:         {}", self.conflicts.len())?;
        writeln!(f, "Not in catalog:    {}", self.missing_from_catalog.len())?;
        writeln!(f, "Queued:            {}", self.queued.len())?;
        for i in &self.added {
            writeln!(f, "  + {:10} {:8} {}", i.ticker, i.classification, i.name)?;
        }
        for c in &self.conflicts {
            writeln!(f, "  ! {c}")?;
        }
        for (ticker, reason) in &self.failed {
            writeln!(f, "  x {ticker}: {reason}")?;
        }
        for t in &self.missing_from_catalog {
            writeln!(f, "  ? {t} (kept, not in catalog)")?;
        }
        Ok(())
    }
}
