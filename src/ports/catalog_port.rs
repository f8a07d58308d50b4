//! Catalog port: the external, authoritative instrument list.

use crate::domain::catalog::CatalogEntry;
use crate::domain::error::CascadeError;
use crate::domain::instrument::Instrument;

pub trait CatalogPort: Send + Sync {
    fn load(&self) -> Result<Vec<CatalogEntry>, CascadeError>;

    /// Dumps the store's instrument table back to the catalog format.
    /// Returns the number of rows written.
    fn export(&self, instruments: &[Instrument]) -> Result<usize, CascadeError>;

    fn exists(&self) -> bool;

    fn location(&self) -> String;
}
