//! Bar merge engine: reconciles a freshly fetched sequence against the
//! canonical rows already stored for one instrument.

use crate::domain::instrument::InstrumentSummary;
use crate::domain::ohlcv::{OhlcvBar, CANONICAL_ROW};
use crate::domain::source::{SourceId, SourcePriority};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// How conflicts with existing canonical rows are settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeMode {
    /// Existing rows are replaced only by strictly higher-priority sources.
    Normal,
    /// Incoming rows win every overlap.
    Forced,
    /// Only the listed dates are touched, and they are always replaced.
    Repair { targets: BTreeSet<NaiveDate> },
}

/// A source's emission reduced to one canonical row per date.
#[derive(Debug, Clone, Default)]
pub struct Canonicalized {
    /// Sorted by date, every row marked canonical.
    pub bars: Vec<OhlcvBar>,
    /// Later rows for a date already emitted earlier in the same fetch.
    pub duplicates_dropped: usize,
}

/// Keeps the first row per date in emission order and drops the rest.
pub fn canonicalize(emitted: Vec<OhlcvBar>) -> Canonicalized {
    let mut seen = HashSet::with_capacity(emitted.len());
    let mut bars = Vec::with_capacity(emitted.len());
    let mut duplicates_dropped = 0;

    for mut bar in emitted {
        if !seen.insert(bar.date) {
            duplicates_dropped += 1;
            continue;
        }
        bar.row_index = CANONICAL_ROW;
        bars.push(bar);
    }

    // stable: order within a date cannot matter after dedup
    bars.sort_by_key(|b| b.date);
    Canonicalized {
        bars,
        duplicates_dropped,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeAction {
    Insert(OhlcvBar),
    Replace { previous: SourceId, bar: OhlcvBar },
}

impl MergeAction {
    pub fn bar(&self) -> &OhlcvBar {
        match self {
            MergeAction::Insert(bar) | MergeAction::Replace { bar, .. } => bar,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub actions: Vec<MergeAction>,
    /// Existing rows kept because their source is at least as trusted.
    pub kept: usize,
    /// Incoming rows identical to what is already stored.
    pub unchanged: usize,
    /// Incoming rows outside a repair's target dates.
    pub ignored: usize,
}

impl MergePlan {
    pub fn inserted(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, MergeAction::Insert(_)))
            .count()
    }

    pub fn replaced(&self) -> usize {
        self.actions.len() - self.inserted()
    }

    pub fn written(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Dates this plan writes.
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.actions.iter().map(|a| a.bar().date).collect()
    }
}

/// What a committed merge did, plus the instrument summary afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub kept: usize,
    pub unchanged: usize,
    pub ignored: usize,
    pub written_dates: BTreeSet<NaiveDate>,
    pub summary: InstrumentSummary,
}

impl CommitOutcome {
    pub fn from_plan(plan: &MergePlan, summary: InstrumentSummary) -> Self {
        Self {
            inserted: plan.inserted(),
            replaced: plan.replaced(),
            kept: plan.kept,
            unchanged: plan.unchanged,
            ignored: plan.ignored,
            written_dates: plan.dates(),
            summary,
        }
    }

    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }
}

fn same_values(a: &OhlcvBar, b: &OhlcvBar) -> bool {
    a.source == b.source
        && a.open == b.open
        && a.high == b.high
        && a.low == b.low
        && a.close == b.close
        && a.volume == b.volume
}

/// Decides, date by date, what to do with `incoming` given the canonical
/// rows in `existing`. `incoming` must already be canonicalized.
pub fn plan_merge(
    existing: &BTreeMap<NaiveDate, OhlcvBar>,
    incoming: &[OhlcvBar],
    mode: &MergeMode,
    priority: &SourcePriority,
) -> MergePlan {
    let mut plan = MergePlan::default();

    for bar in incoming {
        if let MergeMode::Repair { targets } = mode {
            if !targets.contains(&bar.date) {
                plan.ignored += 1;
                continue;
            }
        }

        let Some(current) = existing.get(&bar.date) else {
            match mode {
                MergeMode::Repair { .. } => plan.ignored += 1,
                _ => plan.actions.push(MergeAction::Insert(bar.clone())),
            }
            continue;
        };

        if same_values(current, bar) {
            plan.unchanged += 1;
            continue;
        }

        let replace = match mode {
            MergeMode::Normal => priority.outranks(bar.source, current.source),
            MergeMode::Forced | MergeMode::Repair { .. } => true,
        };

        if replace {
            plan.actions.push(MergeAction::Replace {
                previous: current.source,
                bar: bar.clone(),
            });
        } else {
            plan.kept += 1;
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn bar(day: u32, close: f64, source: SourceId) -> OhlcvBar {
        OhlcvBar {
            ticker: "GGAL".into(),
            date: d(day),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100,
            source,
            row_index: 0,
        }
    }

    fn stored(bars: &[OhlcvBar]) -> BTreeMap<NaiveDate, OhlcvBar> {
        bars.iter().map(|b| (b.date, b.clone())).collect()
    }

    #[test]
    fn canonicalize_keeps_first_emitted_row() {
        let emitted = vec![
            bar(2, 10.0, SourceId::AnalisisTecnico),
            bar(1, 5.0, SourceId::AnalisisTecnico),
            bar(2, 99.0, SourceId::AnalisisTecnico),
        ];
        let c = canonicalize(emitted);
        assert_eq!(c.duplicates_dropped, 1);
        assert_eq!(c.bars.len(), 2);
        assert_eq!(c.bars[0].date, d(1));
        assert_eq!(c.bars[1].close, 10.0);
    }

    #[test]
    fn canonicalize_resets_row_index() {
        let mut b = bar(1, 5.0, SourceId::Yahoo);
        b.row_index = 3;
        let c = canonicalize(vec![b]);
        assert!(c.bars[0].is_canonical());
    }

    #[test]
    fn new_dates_are_inserted() {
        let plan = plan_merge(
            &BTreeMap::new(),
            &[bar(1, 5.0, SourceId::Yahoo), bar(2, 6.0, SourceId::Yahoo)],
            &MergeMode::Normal,
            &SourcePriority::default_order(),
        );
        assert_eq!(plan.inserted(), 2);
        assert_eq!(plan.replaced(), 0);
    }

    #[test]
    fn higher_priority_replaces_lower() {
        let existing = stored(&[bar(1, 5.0, SourceId::Yahoo)]);
        let plan = plan_merge(
            &existing,
            &[bar(1, 6.0, SourceId::Byma)],
            &MergeMode::Normal,
            &SourcePriority::default_order(),
        );
        assert_eq!(plan.replaced(), 1);
        assert_eq!(
            plan.actions[0],
            MergeAction::Replace {
                previous: SourceId::Yahoo,
                bar: bar(1, 6.0, SourceId::Byma)
            }
        );
    }

    #[test]
    fn lower_or_equal_priority_is_kept_out() {
        let existing = stored(&[bar(1, 5.0, SourceId::Byma), bar(2, 5.0, SourceId::Yahoo)]);
        let plan = plan_merge(
            &existing,
            &[bar(1, 6.0, SourceId::Yahoo), bar(2, 6.0, SourceId::Yahoo)],
            &MergeMode::Normal,
            &SourcePriority::default_order(),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.kept, 2);
    }

    #[test]
    fn forced_replaces_regardless_of_priority() {
        let existing = stored(&[bar(1, 5.0, SourceId::Byma)]);
        let plan = plan_merge(
            &existing,
            &[bar(1, 6.0, SourceId::Iol)],
            &MergeMode::Forced,
            &SourcePriority::default_order(),
        );
        assert_eq!(plan.replaced(), 1);
    }

    #[test]
    fn identical_rows_are_unchanged_even_when_forced() {
        let existing = stored(&[bar(1, 5.0, SourceId::Byma)]);
        let plan = plan_merge(
            &existing,
            &[bar(1, 5.0, SourceId::Byma)],
            &MergeMode::Forced,
            &SourcePriority::default_order(),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn repair_touches_only_targets() {
        let existing = stored(&[bar(1, 5.0, SourceId::Byma), bar(2, 500.0, SourceId::Yahoo)]);
        let targets: BTreeSet<_> = [d(2)].into_iter().collect();
        let plan = plan_merge(
            &existing,
            &[
                bar(1, 6.0, SourceId::AnalisisTecnico),
                bar(2, 5.1, SourceId::AnalisisTecnico),
                bar(3, 5.2, SourceId::AnalisisTecnico),
            ],
            &MergeMode::Repair { targets },
            &SourcePriority::default_order(),
        );
        assert_eq!(plan.written(), 1);
        assert_eq!(plan.replaced(), 1);
        assert_eq!(plan.ignored, 2);
        assert_eq!(plan.dates().into_iter().collect::<Vec<_>>(), vec![d(2)]);
    }
}
