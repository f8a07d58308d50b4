//! Run orchestrator: selects instruments, drives the cascade for each one,
//! commits merged bars and aggregates the run report.
//!
//! Instruments are processed in parallel on a bounded worker pool; per-source
//! limits are enforced by the gates inside [`SourceRegistry`]. The report is
//! assembled in selection order so identical source responses always yield
//! the same summary.

use crate::domain::cascade::{Resolution, SourceRegistry};
use crate::domain::catalog::{plan_sync, CatalogEntry, SyncReport};
use crate::domain::error::CascadeError;
use crate::domain::instrument::Instrument;
use crate::domain::merge::{canonicalize, MergeMode};
use crate::domain::ohlcv::DateRange;
use crate::domain::repair::{span, InstrumentRepair, RepairReport, RepairTarget};
use crate::domain::report::{DownloadRecord, DownloadStatus, InstrumentReport, Outcome, RunReport};
use crate::domain::settings::EngineSettings;
use crate::domain::source::{SourceId, SourcePriority};
use crate::domain::status::StatusReport;
use crate::ports::catalog_port::CatalogPort;
use crate::ports::store_port::StorePort;
use chrono::{NaiveDate, Utc};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Global flags applied uniformly to every instrument in a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub force: bool,
    /// Include sources marked slow in the configuration.
    pub include_slow: bool,
    pub skip_sources: Vec<SourceId>,
}

pub struct Engine<'a> {
    store: &'a dyn StorePort,
    catalog: Option<&'a dyn CatalogPort>,
    sources: &'a SourceRegistry,
    settings: EngineSettings,
    today: NaiveDate,
    cancel: Arc<AtomicBool>,
}

impl<'a> Engine<'a> {
    pub fn new(
        store: &'a dyn StorePort,
        sources: &'a SourceRegistry,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            catalog: None,
            sources,
            settings,
            today: Utc::now().date_naive(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_catalog(mut self, catalog: &'a dyn CatalogPort) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Pins the run date. Freshness and fetch ranges are computed against it.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// The cascade order for this run, after slow and skipped sources are
    /// removed.
    pub fn run_order(&self, options: &RunOptions) -> Result<SourcePriority, CascadeError> {
        let mut excluded = options.skip_sources.clone();
        if !options.include_slow {
            excluded.extend(self.settings.slow.iter().copied());
        }
        let order = self.settings.priority.without(&excluded);
        match order.sources().first() {
            None => Err(CascadeError::ConfigInvalid {
                section: "sources".to_string(),
                key: "order".to_string(),
                reason: "no sources left after exclusions".to_string(),
            }),
            Some(first) if order.sources().iter().all(|id| self.sources.get(*id).is_none()) => {
                Err(CascadeError::SourceNotConfigured(*first))
            }
            Some(_) => Ok(order),
        }
    }

    fn pool(&self) -> Result<rayon::ThreadPool, CascadeError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .build()
            .map_err(|e| CascadeError::ConfigInvalid {
                section: "run".to_string(),
                key: "workers".to_string(),
                reason: e.to_string(),
            })
    }

    /// Default run over every enabled instrument.
    pub fn run(&self, options: &RunOptions) -> Result<RunReport, CascadeError> {
        let selection = self.store.enabled_instruments()?;
        self.run_selected(&selection, options)
    }

    /// Runs an explicit selection. The enabled flag is not consulted.
    pub fn run_selected(
        &self,
        selection: &[Instrument],
        options: &RunOptions,
    ) -> Result<RunReport, CascadeError> {
        self.run_queue(selection, options, &HashSet::new())
    }

    /// Tickers in `deepen` are refetched over the full history range.
    fn run_queue(
        &self,
        selection: &[Instrument],
        options: &RunOptions,
        deepen: &HashSet<String>,
    ) -> Result<RunReport, CascadeError> {
        let order = self.run_order(options)?;
        info!(
            instruments = selection.len(),
            order = ?order.sources(),
            force = options.force,
            "starting run"
        );

        let reports = self.pool()?.install(|| {
            selection
                .par_iter()
                .map(|instrument| {
                    let deep = deepen.contains(&instrument.ticker);
                    self.process(instrument, &order, options.force, deep)
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let report = RunReport::new(reports).with_min_years(self.settings.min_years);
        if report.was_cancelled() {
            warn!("run cancelled before every instrument was processed");
        }
        Ok(report)
    }

    fn fetch_range(&self, instrument: &Instrument, force: bool) -> DateRange {
        let start = match instrument.summary.last_date {
            Some(last) if !force && instrument.has_data() => last.succ_opt().unwrap_or(last),
            _ => self.settings.history_start,
        };
        DateRange::new(start, self.today)
    }

    /// `deepen` fetches from `history_start` and skips the freshness check
    /// while keeping the normal merge rules.
    fn process(
        &self,
        instrument: &Instrument,
        order: &SourcePriority,
        force: bool,
        deepen: bool,
    ) -> Result<InstrumentReport, CascadeError> {
        let ticker = instrument.ticker.as_str();
        let held = instrument.summary.bars_count;
        let held_years = instrument.summary.years_of_data();

        if self.cancelled() {
            return Ok(InstrumentReport {
                canonical_bars: held,
                history_years: held_years,
                ..InstrumentReport::new(ticker, Outcome::Cancelled)
            });
        }

        let fresh = self
            .settings
            .freshness
            .is_fresh(instrument.summary.last_date, self.today);
        let range = self.fetch_range(instrument, force || deepen);
        if !force && !deepen && (fresh || range.is_empty()) {
            debug!(%ticker, last = ?instrument.summary.last_date, "fresh, skipping");
            return Ok(InstrumentReport {
                canonical_bars: held,
                history_years: held_years,
                ..InstrumentReport::new(ticker, Outcome::Fresh)
            });
        }

        let started_at = Utc::now();
        let resolution = self.sources.resolve(ticker, range, order);
        let answered = resolution.any_answered();
        let errors: Vec<String> = resolution
            .failures()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect();
        let Resolution { attempts, winner } = resolution;

        let Some(winner) = winner else {
            let (outcome, status) = if answered {
                (Outcome::NoNewData, DownloadStatus::Empty)
            } else {
                (Outcome::FailedAllSources, DownloadStatus::Error)
            };
            let record = DownloadRecord {
                ticker: ticker.to_string(),
                started_at,
                finished_at: Utc::now(),
                status,
                bars_found: 0,
                bars_stored: 0,
                error_msg: (!errors.is_empty()).then(|| errors.join("; ")),
                source: None,
            };
            if let Err(e) = self.store.record_download(&record) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(%ticker, error = %e, "could not append download log");
            }
            info!(%ticker, outcome = %outcome, "resolved");
            return Ok(InstrumentReport {
                attempts,
                canonical_bars: held,
                history_years: held_years,
                ..InstrumentReport::new(ticker, outcome)
            });
        };

        let canonical = canonicalize(winner.bars);
        if canonical.duplicates_dropped > 0 {
            warn!(
                %ticker,
                source = %winner.source,
                dropped = canonical.duplicates_dropped,
                "source emitted duplicate dates"
            );
        }
        let mut anomalies = 0;
        for bar in &canonical.bars {
            let found = bar.anomalies();
            if !found.is_empty() {
                anomalies += 1;
                let found: Vec<String> = found.iter().map(|a| a.to_string()).collect();
                warn!(
                    %ticker,
                    date = %bar.date,
                    source = %bar.source,
                    anomalies = %found.join(", "),
                    "bar violates OHLC invariants"
                );
            }
        }

        if instrument.id == 0 {
            if let Err(e) = self.ensure_instrument(instrument) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(%ticker, error = %e, "could not register instrument");
                return Ok(InstrumentReport {
                    attempts,
                    canonical_bars: held,
                    history_years: held_years,
                    ..InstrumentReport::new(ticker, Outcome::StoreFailed(e.to_string()))
                });
            }
        }

        let mode = if force {
            MergeMode::Forced
        } else {
            MergeMode::Normal
        };
        let record = DownloadRecord {
            ticker: ticker.to_string(),
            started_at,
            finished_at: Utc::now(),
            status: DownloadStatus::Ok,
            bars_found: canonical.bars.len(),
            bars_stored: 0,
            error_msg: None,
            source: Some(winner.source),
        };

        let mut report = InstrumentReport {
            attempts,
            duplicates_dropped: canonical.duplicates_dropped,
            anomalies,
            canonical_bars: held,
            history_years: held_years,
            ..InstrumentReport::new(ticker, Outcome::NoNewData)
        };

        match self.store.commit_merge(
            ticker,
            &canonical.bars,
            &mode,
            &self.settings.priority,
            &record,
        ) {
            Ok(outcome) => {
                report.bars_written = outcome.written();
                report.canonical_bars = outcome.summary.bars_count;
                report.history_years = outcome.summary.years_of_data();
                if outcome.written() > 0 {
                    report.outcome = Outcome::Succeeded {
                        source: winner.source,
                    };
                }
                info!(
                    %ticker,
                    source = %winner.source,
                    inserted = outcome.inserted,
                    replaced = outcome.replaced,
                    kept = outcome.kept,
                    "committed"
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(%ticker, error = %e, "commit rolled back");
                report.outcome = Outcome::StoreFailed(e.to_string());
            }
        }
        Ok(report)
    }

    /// Explicit tickers unknown to the store get an instrument row before
    /// their first commit.
    fn ensure_instrument(&self, instrument: &Instrument) -> Result<(), CascadeError> {
        if self.store.get_instrument(&instrument.ticker)?.is_some() {
            return Ok(());
        }
        let entry = CatalogEntry {
            id: None,
            ..CatalogEntry::from(instrument)
        };
        self.store.insert_instrument(&entry)?;
        Ok(())
    }

    fn catalog(&self) -> Result<&'a dyn CatalogPort, CascadeError> {
        self.catalog.ok_or_else(|| CascadeError::Catalog {
            file: "(none)".to_string(),
            reason: "no catalog configured".to_string(),
        })
    }

    /// Applies the catalog diff to the instrument table, then resolves the
    /// queued instruments.
    pub fn sync(&self, options: &RunOptions) -> Result<(SyncReport, RunReport), CascadeError> {
        let catalog = self.catalog()?;
        let entries = catalog.load()?;
        let existing = self.store.list_instruments()?;
        let plan = plan_sync(&entries, &existing);

        for c in &plan.conflicts {
            warn!(ticker = %c.ticker, catalog = %c.catalog, store = %c.existing, "catalog conflict, skipping");
        }

        let mut report = SyncReport {
            catalog_rows: entries.len(),
            conflicts: plan.conflicts.clone(),
            unchanged: plan.unchanged.len(),
            missing_from_catalog: plan.missing_from_catalog.clone(),
            ..SyncReport::default()
        };

        for entry in &plan.additions {
            match self.store.insert_instrument(entry) {
                Ok(instrument) => {
                    info!(ticker = %instrument.ticker, class = %instrument.classification, "added");
                    report.added.push(instrument);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(ticker = %entry.ticker, error = %e, "insert failed");
                    report.failed.push((entry.ticker.clone(), e.to_string()));
                }
            }
        }

        let conflicted: HashSet<&str> = plan.conflicts.iter().map(|c| c.ticker.as_str()).collect();
        let unchanged: HashSet<&str> = plan.unchanged.iter().map(String::as_str).collect();

        let mut queue: Vec<Instrument> = report
            .added
            .iter()
            .filter(|i| i.enabled)
            .cloned()
            .collect();
        queue.extend(
            existing
                .iter()
                .filter(|i| i.enabled)
                .filter(|i| unchanged.contains(i.ticker.as_str()))
                .filter(|i| !conflicted.contains(i.ticker.as_str()))
                .filter(|i| {
                    options.force
                        || (self.settings.include_empty && !i.has_data())
                        || i.has_short_history(self.settings.min_years)
                })
                .cloned(),
        );
        queue.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        report.queued = queue.iter().map(|i| i.ticker.clone()).collect();

        let deepen: HashSet<String> = queue
            .iter()
            .filter(|i| i.has_short_history(self.settings.min_years))
            .map(|i| i.ticker.clone())
            .collect();
        if !deepen.is_empty() {
            info!(
                instruments = deepen.len(),
                min_years = self.settings.min_years,
                "refetching short histories"
            );
        }

        let run = if queue.is_empty() {
            RunReport::default().with_min_years(self.settings.min_years)
        } else {
            self.run_queue(&queue, options, &deepen)?
        };
        Ok((report, run))
    }

    /// Re-resolves canonical rows matching `target` from the remaining
    /// sources and overwrites only those rows.
    pub fn repair(
        &self,
        target: RepairTarget,
        options: &RunOptions,
    ) -> Result<RepairReport, CascadeError> {
        let rows = self
            .store
            .rows_from_source(target.classification, target.source)?;
        let mut skip = options.skip_sources.clone();
        skip.push(target.source);
        let order = self.run_order(&RunOptions {
            skip_sources: skip,
            ..options.clone()
        })?;
        info!(
            %target,
            instruments = rows.len(),
            rows = rows.values().map(BTreeSet::len).sum::<usize>(),
            "starting repair"
        );

        let work: Vec<(String, BTreeSet<NaiveDate>)> = rows.into_iter().collect();
        let instruments = self.pool()?.install(|| {
            work.par_iter()
                .map(|(ticker, targets)| self.repair_one(ticker, targets, &order))
                .collect::<Result<Vec<_>, _>>()
        })?;

        Ok(RepairReport {
            target,
            instruments,
        })
    }

    fn repair_one(
        &self,
        ticker: &str,
        targets: &BTreeSet<NaiveDate>,
        order: &SourcePriority,
    ) -> Result<InstrumentRepair, CascadeError> {
        let mut repair = InstrumentRepair::new(ticker, targets);
        if self.cancelled() {
            repair.error = Some(CascadeError::Interrupted.to_string());
            return Ok(repair);
        }
        let Some(range) = span(targets) else {
            return Ok(repair);
        };

        let started_at = Utc::now();
        let resolution = self.sources.resolve(ticker, range, order);
        repair.attempts = resolution.attempts.clone();
        let Some(winner) = resolution.winner else {
            warn!(%ticker, targeted = targets.len(), "no alternate source had data");
            return Ok(repair);
        };

        let canonical = canonicalize(winner.bars);
        let record = DownloadRecord {
            ticker: ticker.to_string(),
            started_at,
            finished_at: Utc::now(),
            status: DownloadStatus::Repair,
            bars_found: canonical.bars.len(),
            bars_stored: 0,
            error_msg: None,
            source: Some(winner.source),
        };
        let mode = MergeMode::Repair {
            targets: targets.clone(),
        };

        match self.store.commit_merge(
            ticker,
            &canonical.bars,
            &mode,
            &self.settings.priority,
            &record,
        ) {
            Ok(outcome) => {
                repair.resolved_from = Some(winner.source);
                repair.settle(targets, &outcome.written_dates);
                info!(
                    %ticker,
                    source = %winner.source,
                    repaired = repair.repaired.len(),
                    unrepaired = repair.unrepaired.len(),
                    "repaired"
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(%ticker, error = %e, "repair rolled back");
                repair.error = Some(e.to_string());
            }
        }
        Ok(repair)
    }

    /// Dumps the instrument table to the catalog file.
    pub fn export(&self) -> Result<usize, CascadeError> {
        let catalog = self.catalog()?;
        let instruments = self.store.list_instruments()?;
        let written = catalog.export(&instruments)?;
        info!(rows = written, file = %catalog.location(), "exported catalog");
        Ok(written)
    }

    pub fn status(&self, site_dir: Option<&Path>) -> Result<StatusReport, CascadeError> {
        Ok(StatusReport {
            store: self.store.status()?,
            store_location: self.store.location(),
            catalog_location: self.catalog.map(|c| c.location()),
            catalog_present: self.catalog.is_some_and(|c| c.exists()),
            site_location: site_dir.map(|d| d.display().to_string()),
            site_present: site_dir.is_some_and(|d| d.join("index.html").is_file()),
        })
    }
}
