//! Error types for the ingestion engine.

use crate::domain::selection::SelectionError;
use crate::domain::source::SourceId;

/// Failure of a single source adapter call.
///
/// These never abort a run: the cascade records them and moves on to the
/// next source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("rate limited: {reason}")]
    RateLimited { reason: String },

    #[error("unexpected response shape: {reason}")]
    ParseError { reason: String },

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

impl FetchError {
    /// Short label used in the download log and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Unavailable { .. } => "unavailable",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::ParseError { .. } => "parse_error",
            FetchError::Timeout { .. } => "timeout",
        }
    }
}

/// Top-level error type for ohlcv-cascade.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("catalog error in {file}: {reason}")]
    Catalog { file: String, reason: String },

    #[error("catalog conflict for {ticker}: catalog says {catalog}, store says {store}")]
    CatalogConflict {
        ticker: String,
        catalog: String,
        store: String,
    },

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("unknown classification: {0}")]
    UnknownClassification(String),

    #[error("source {0} is not configured for this run")]
    SourceNotConfigured(SourceId),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("run interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CascadeError {
    /// Storage-layer faults that make continuing the run pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CascadeError::StorageUnavailable { .. })
    }
}

impl From<&CascadeError> for std::process::ExitCode {
    fn from(err: &CascadeError) -> Self {
        let code: u8 = match err {
            CascadeError::Io(_) => 1,
            CascadeError::ConfigParse { .. }
            | CascadeError::ConfigMissing { .. }
            | CascadeError::ConfigInvalid { .. } => 2,
            CascadeError::Database { .. }
            | CascadeError::DatabaseQuery { .. }
            | CascadeError::StorageUnavailable { .. } => 3,
            CascadeError::Catalog { .. } | CascadeError::CatalogConflict { .. } => 4,
            CascadeError::UnknownSource(_)
            | CascadeError::UnknownClassification(_)
            | CascadeError::SourceNotConfigured(_)
            | CascadeError::Selection(_) => 5,
            CascadeError::Interrupted => 6,
        };
        std::process::ExitCode::from(code)
    }
}
