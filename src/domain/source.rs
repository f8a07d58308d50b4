//! Source identifiers and the priority order used to rank them.

use crate::domain::error::CascadeError;
use std::fmt;
use std::str::FromStr;

/// Every data provider the engine knows about. Provenance on a stored bar is
/// always one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    Byma,
    Iol,
    Yahoo,
    AnalisisTecnico,
}

impl SourceId {
    pub const ALL: [SourceId; 4] = [
        SourceId::Byma,
        SourceId::Iol,
        SourceId::Yahoo,
        SourceId::AnalisisTecnico,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Byma => "byma",
            SourceId::Iol => "iol",
            SourceId::Yahoo => "yahoo",
            SourceId::AnalisisTecnico => "analisistecnico",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| CascadeError::UnknownSource(s.trim().to_string()))
    }
}

/// Configured reliability order, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePriority {
    order: Vec<SourceId>,
}

impl SourcePriority {
    /// Fastest, most structured sources first; the browser-driven one last.
    pub fn default_order() -> Self {
        Self {
            order: vec![
                SourceId::Byma,
                SourceId::Yahoo,
                SourceId::AnalisisTecnico,
                SourceId::Iol,
            ],
        }
    }

    /// Builds an order from a list, dropping repeated entries.
    pub fn new(order: Vec<SourceId>) -> Self {
        let mut deduped = Vec::with_capacity(order.len());
        for id in order {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        Self { order: deduped }
    }

    pub fn parse_list(input: &str) -> Result<Self, CascadeError> {
        let ids = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SourceId::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(ids))
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.order
    }

    /// Position in the order; sources missing from it rank below everything.
    pub fn rank(&self, id: SourceId) -> usize {
        self.order
            .iter()
            .position(|s| *s == id)
            .unwrap_or(self.order.len())
    }

    /// True when `a` is strictly more trusted than `b`.
    pub fn outranks(&self, a: SourceId, b: SourceId) -> bool {
        self.rank(a) < self.rank(b)
    }

    pub fn without(&self, excluded: &[SourceId]) -> Self {
        Self {
            order: self
                .order
                .iter()
                .copied()
                .filter(|id| !excluded.contains(id))
                .collect(),
        }
    }
}
