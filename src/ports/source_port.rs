//! Source adapter port: one implementation per data provider.

use crate::domain::error::FetchError;
use crate::domain::ohlcv::{DateRange, OhlcvBar};
use crate::domain::source::SourceId;

/// A provider of daily bars. Implementations normalise their raw payloads
/// into [`OhlcvBar`] and never touch the store.
///
/// Calls must be idempotent: repeating a fetch with the same arguments
/// returns equivalent data, modulo updates on the provider's side.
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Bars for `ticker` within `range`, in the provider's emission order.
    /// An empty vector means the provider answered but had nothing.
    fn fetch(&self, ticker: &str, range: DateRange) -> Result<Vec<OhlcvBar>, FetchError>;
}
