//! Builds the instrument selection for a run from explicit ticker lists.

use crate::domain::error::CascadeError;
use crate::domain::instrument::{Classification, Instrument};
use crate::ports::store_port::StorePort;
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("empty token in ticker list")]
    EmptyToken,

    #[error("duplicate ticker: {0}")]
    DuplicateTicker(String),
}

/// Parses `GGAL, ypfd ,AL30` into upper-cased tickers, rejecting blanks and
/// repeats.
pub fn parse_tickers(input: &str) -> Result<Vec<String>, SelectionError> {
    let mut tickers = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(SelectionError::EmptyToken);
        }
        let ticker = trimmed.to_uppercase();
        if !seen.insert(ticker.clone()) {
            return Err(SelectionError::DuplicateTicker(ticker));
        }
        tickers.push(ticker);
    }

    Ok(tickers)
}

/// Resolves tickers against the store. Unknown tickers are still attempted,
/// as stocks with no stored data.
pub fn select_tickers(
    store: &dyn StorePort,
    tickers: &[String],
) -> Result<Vec<Instrument>, CascadeError> {
    let mut selected = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        match store.get_instrument(ticker)? {
            Some(instrument) => selected.push(instrument),
            None => {
                warn!(%ticker, "not in store, attempting as STOCK");
                selected.push(Instrument::ad_hoc(ticker, Classification::Stock));
            }
        }
    }
    Ok(selected)
}
