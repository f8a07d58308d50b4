//! CSV catalog adapter.
//!
//! Columns: `id,name,ticker,trading_type,settlement_type,enabled,description`.
//! Only `ticker` and `trading_type` are required when reading.

use crate::domain::catalog::CatalogEntry;
use crate::domain::error::CascadeError;
use crate::domain::instrument::{Classification, Instrument};
use crate::ports::catalog_port::CatalogPort;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub struct CsvCatalog {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    ticker: String,
    trading_type: String,
    #[serde(default)]
    settlement_type: Option<String>,
    #[serde(default)]
    enabled: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: i64,
    name: &'a str,
    ticker: &'a str,
    trading_type: &'static str,
    settlement_type: &'a str,
    enabled: &'static str,
    description: &'a str,
}

fn parse_enabled(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_lowercase()) {
        None => true,
        Some(v) if v.is_empty() => true,
        Some(v) => matches!(v.as_str(), "true" | "1" | "yes"),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CsvCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn err(&self, reason: impl Into<String>) -> CascadeError {
        CascadeError::Catalog {
            file: self.path.display().to_string(),
            reason: reason.into(),
        }
    }

    fn entry_from_row(row: CatalogRow) -> Result<CatalogEntry, CascadeError> {
        let ticker = row.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(CascadeError::Catalog {
                file: String::new(),
                reason: "empty ticker".to_string(),
            });
        }
        let classification: Classification = row.trading_type.parse()?;
        let name = non_empty(row.name).unwrap_or_else(|| ticker.clone());
        Ok(CatalogEntry {
            id: row.id.filter(|id| *id > 0),
            name,
            ticker,
            classification,
            settlement_type: non_empty(row.settlement_type),
            enabled: parse_enabled(row.enabled.as_deref()),
            description: non_empty(row.description),
        })
    }
}

impl CatalogPort for CsvCatalog {
    fn load(&self) -> Result<Vec<CatalogEntry>, CascadeError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| self.err(format!("failed to read: {e}")))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut entries = Vec::new();
        for (i, result) in rdr.deserialize::<CatalogRow>().enumerate() {
            // header is line 1
            let line = i + 2;
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!(file = %self.path.display(), line, error = %e, "skipping catalog row");
                    continue;
                }
            };
            match Self::entry_from_row(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(file = %self.path.display(), line, error = %e, "skipping catalog row")
                }
            }
        }
        Ok(entries)
    }

    fn export(&self, instruments: &[Instrument]) -> Result<usize, CascadeError> {
        let mut sorted: Vec<&Instrument> = instruments.iter().collect();
        sorted.sort_by(|a, b| {
            a.classification
                .cmp(&b.classification)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.err(e.to_string()))?;
        }
        let mut wtr = csv::Writer::from_path(&self.path).map_err(|e| self.err(e.to_string()))?;
        for i in &sorted {
            wtr.serialize(ExportRow {
                id: i.id,
                name: &i.name,
                ticker: &i.ticker,
                trading_type: i.classification.as_str(),
                settlement_type: i.settlement_type.as_deref().unwrap_or(""),
                enabled: if i.enabled { "true" } else { "false" },
                description: i.description.as_deref().unwrap_or(""),
            })
            .map_err(|e| self.err(e.to_string()))?;
        }
        wtr.flush()?;
        Ok(sorted.len())
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
