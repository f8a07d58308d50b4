//! Cascade resolver: tries sources for one instrument in priority order until
//! one returns bars.
//!
//! The per-instrument walk is a small state machine
//! (`NotStarted -> TryingSource(i) -> Resolved | ExhaustedSources`) so the
//! ordering and short-circuit rules can be exercised without any I/O.
//! Within one instrument sources are always tried sequentially.

use crate::domain::error::FetchError;
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::source::{SourceId, SourcePriority};
use crate::domain::throttle::{GateLimits, SourceGate};
use crate::ports::source_port::SourceAdapter;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Bars(usize),
    Empty,
    Failed(FetchError),
    /// The source is in the order but no adapter is registered for it.
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceAttempt {
    pub source: SourceId,
    pub result: AttemptResult,
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            AttemptResult::Bars(n) => write!(f, "{}: {} bars", self.source, n),
            AttemptResult::Empty => write!(f, "{}: no data", self.source),
            AttemptResult::Failed(e) => write!(f, "{}: {}", self.source, e),
            AttemptResult::NotConfigured => write!(f, "{}: not configured", self.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CascadeState {
    NotStarted,
    TryingSource(usize),
    Resolved {
        source: SourceId,
        bars: Vec<OhlcvBar>,
    },
    ExhaustedSources,
}

impl CascadeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CascadeState::Resolved { .. } | CascadeState::ExhaustedSources
        )
    }
}

/// Ordered walk over the sources for one instrument. First success wins.
#[derive(Debug)]
pub struct Cascade {
    order: Vec<SourceId>,
    state: CascadeState,
    attempts: Vec<SourceAttempt>,
}

impl Cascade {
    pub fn new(order: &SourcePriority) -> Self {
        Self {
            order: order.sources().to_vec(),
            state: CascadeState::NotStarted,
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    pub fn attempts(&self) -> &[SourceAttempt] {
        &self.attempts
    }

    /// Performs one transition. `fetch` is called at most once, and only
    /// from the `TryingSource` state. `None` means the source has no adapter.
    pub fn step<F>(&mut self, fetch: &mut F) -> &CascadeState
    where
        F: FnMut(SourceId) -> Option<Result<Vec<OhlcvBar>, FetchError>>,
    {
        let next = match &self.state {
            CascadeState::NotStarted => self.position(0),
            CascadeState::TryingSource(i) => {
                let i = *i;
                let source = self.order[i];
                let result = match fetch(source) {
                    None => AttemptResult::NotConfigured,
                    Some(Ok(bars)) if !bars.is_empty() => {
                        self.attempts.push(SourceAttempt {
                            source,
                            result: AttemptResult::Bars(bars.len()),
                        });
                        self.state = CascadeState::Resolved { source, bars };
                        return &self.state;
                    }
                    Some(Ok(_)) => AttemptResult::Empty,
                    Some(Err(e)) => AttemptResult::Failed(e),
                };
                self.attempts.push(SourceAttempt { source, result });
                self.position(i + 1)
            }
            CascadeState::Resolved { .. } | CascadeState::ExhaustedSources => return &self.state,
        };
        self.state = next;
        &self.state
    }

    fn position(&self, i: usize) -> CascadeState {
        if i < self.order.len() {
            CascadeState::TryingSource(i)
        } else {
            CascadeState::ExhaustedSources
        }
    }

    /// Steps until a terminal state is reached.
    pub fn run<F>(mut self, mut fetch: F) -> Resolution
    where
        F: FnMut(SourceId) -> Option<Result<Vec<OhlcvBar>, FetchError>>,
    {
        while !self.state.is_terminal() {
            self.step(&mut fetch);
        }
        self.finish()
    }

    pub fn finish(self) -> Resolution {
        let winner = match self.state {
            CascadeState::Resolved { source, bars } => Some(Winner { source, bars }),
            _ => None,
        };
        Resolution {
            attempts: self.attempts,
            winner,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    pub source: SourceId,
    pub bars: Vec<OhlcvBar>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub attempts: Vec<SourceAttempt>,
    pub winner: Option<Winner>,
}

impl Resolution {
    /// At least one source answered, even if with nothing.
    pub fn any_answered(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| matches!(a.result, AttemptResult::Empty | AttemptResult::Bars(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (SourceId, &FetchError)> {
        self.attempts.iter().filter_map(|a| match &a.result {
            AttemptResult::Failed(e) => Some((a.source, e)),
            _ => None,
        })
    }
}

pub struct RegisteredSource {
    pub adapter: Box<dyn SourceAdapter>,
    pub gate: SourceGate,
    /// Slow, fragile sources are left out of default runs.
    pub slow: bool,
}

/// The adapters available to a run, each behind its own gate.
#[derive(Default)]
pub struct SourceRegistry {
    entries: Vec<RegisteredSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>, limits: GateLimits, slow: bool) {
        let id = adapter.id();
        self.entries.retain(|e| e.adapter.id() != id);
        self.entries.push(RegisteredSource {
            adapter,
            gate: SourceGate::new(limits),
            slow,
        });
    }

    pub fn with(mut self, adapter: Box<dyn SourceAdapter>, limits: GateLimits, slow: bool) -> Self {
        self.register(adapter, limits, slow);
        self
    }

    pub fn get(&self, id: SourceId) -> Option<&RegisteredSource> {
        self.entries.iter().find(|e| e.adapter.id() == id)
    }

    pub fn slow_sources(&self) -> Vec<SourceId> {
        self.entries
            .iter()
            .filter(|e| e.slow)
            .map(|e| e.adapter.id())
            .collect()
    }

    /// Calls one adapter through its gate, stamping provenance and ticker on
    /// every returned row.
    pub fn fetch(
        &self,
        id: SourceId,
        ticker: &str,
        range: DateRange,
    ) -> Option<Result<Vec<OhlcvBar>, FetchError>> {
        let entry = self.get(id)?;
        let _permit = entry.gate.acquire();
        debug!(%ticker, source = %id, start = %range.start, end = %range.end, "fetching");
        let result = entry.adapter.fetch(ticker, range).map(|mut bars| {
            for bar in &mut bars {
                bar.source = id;
                bar.ticker = ticker.to_string();
            }
            bars
        });
        if let Err(e) = &result {
            warn!(%ticker, source = %id, error = %e, "source failed");
        }
        Some(result)
    }

    /// Runs the cascade for one instrument over `order`.
    pub fn resolve(&self, ticker: &str, range: DateRange, order: &SourcePriority) -> Resolution {
        Cascade::new(order).run(|id| self.fetch(id, ticker, range))
    }
}
