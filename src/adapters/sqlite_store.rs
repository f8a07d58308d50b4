//! SQLite store adapter: instrument table, bar table and download log.

use crate::domain::catalog::CatalogEntry;
use crate::domain::error::CascadeError;
use crate::domain::instrument::{Classification, Instrument, InstrumentSummary};
use crate::domain::merge::{plan_merge, CommitOutcome, MergeMode};
use crate::domain::ohlcv::{OhlcvBar, CANONICAL_ROW};
use crate::domain::report::DownloadRecord;
use crate::domain::source::{SourceId, SourcePriority};
use crate::domain::status::{ClassificationStatus, StoreStatus};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::StorePort;
use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;

const DATE_FMT: &str = "%Y-%m-%d";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS instruments (
        id INTEGER PRIMARY KEY,
        ticker TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        trading_type TEXT NOT NULL,
        settlement_type TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        description TEXT,
        bars_count INTEGER NOT NULL DEFAULT 0,
        first_date TEXT,
        last_date TEXT,
        data_source TEXT,
        downloaded_at TEXT
    );
    CREATE TABLE IF NOT EXISTS ohlcv (
        ticker TEXT NOT NULL,
        date TEXT NOT NULL,
        open REAL NOT NULL,
        high REAL NOT NULL,
        low REAL NOT NULL,
        close REAL NOT NULL,
        volume INTEGER NOT NULL,
        row_index INTEGER NOT NULL DEFAULT 0,
        data_source TEXT NOT NULL,
        PRIMARY KEY (ticker, date, row_index)
    );
    CREATE INDEX IF NOT EXISTS idx_ohlcv_source ON ohlcv(data_source, row_index);
    CREATE INDEX IF NOT EXISTS idx_ohlcv_date ON ohlcv(date);
    CREATE TABLE IF NOT EXISTS download_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        status TEXT NOT NULL,
        bars_found INTEGER NOT NULL,
        bars_stored INTEGER NOT NULL,
        error_msg TEXT,
        data_source TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_download_log_ticker ON download_log(ticker);";

const INSTRUMENT_COLUMNS: &str = "id, ticker, name, trading_type, settlement_type, enabled,
    description, bars_count, first_date, last_date, data_source, downloaded_at";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    location: String,
}

fn query_err(e: rusqlite::Error) -> CascadeError {
    CascadeError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn unavailable(e: r2d2::Error) -> CascadeError {
    CascadeError::StorageUnavailable {
        reason: e.to_string(),
    }
}

/// Parses a TEXT column, surfacing failures as conversion errors.
fn parse_col<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_date_col(idx: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

fn instrument_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Instrument> {
    let trading_type: String = row.get(3)?;
    let data_source: Option<String> = row.get(10)?;
    let downloaded_at: Option<String> = row.get(11)?;
    let bars_count: i64 = row.get(7)?;
    Ok(Instrument {
        id: row.get(0)?,
        ticker: row.get(1)?,
        name: row.get(2)?,
        classification: parse_col::<Classification>(3, &trading_type)?,
        settlement_type: row.get(4)?,
        enabled: row.get(5)?,
        description: row.get(6)?,
        summary: InstrumentSummary {
            bars_count: bars_count.max(0) as usize,
            first_date: parse_date_col(8, row.get(8)?)?,
            last_date: parse_date_col(9, row.get(9)?)?,
            data_source: data_source
                .map(|s| parse_col::<SourceId>(10, &s))
                .transpose()?,
            downloaded_at: downloaded_at
                .map(|s| parse_col::<DateTime<Utc>>(11, &s))
                .transpose()?,
        },
    })
}

fn bar_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OhlcvBar> {
    let date: String = row.get(1)?;
    let source: String = row.get(8)?;
    Ok(OhlcvBar {
        ticker: row.get(0)?,
        date: NaiveDate::parse_from_str(&date, DATE_FMT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
        row_index: row.get(7)?,
        source: parse_col::<SourceId>(8, &source)?,
    })
}

fn load_canonical(conn: &Connection, ticker: &str) -> Result<Vec<OhlcvBar>, CascadeError> {
    let mut stmt = conn
        .prepare(
            "SELECT ticker, date, open, high, low, close, volume, row_index, data_source
             FROM ohlcv
             WHERE ticker = ?1 AND row_index = ?2
             ORDER BY date ASC",
        )
        .map_err(query_err)?;
    let rows = stmt
        .query_map(params![ticker, CANONICAL_ROW], bar_from_row)
        .map_err(query_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
}

fn load_instrument(conn: &Connection, ticker: &str) -> Result<Option<Instrument>, CascadeError> {
    conn.query_row(
        &format!("SELECT {INSTRUMENT_COLUMNS} FROM instruments WHERE ticker = ?1"),
        params![ticker],
        instrument_from_row,
    )
    .optional()
    .map_err(query_err)
}

/// Recomputes the cached summary from the canonical rows. `source` replaces
/// the stored provenance only when given.
fn refresh_summary(
    conn: &Connection,
    ticker: &str,
    source: Option<SourceId>,
    at: Option<DateTime<Utc>>,
) -> Result<InstrumentSummary, CascadeError> {
    let (count, first, last): (i64, Option<String>, Option<String>) = conn
        .query_row(
            "SELECT COUNT(*), MIN(date), MAX(date) FROM ohlcv
             WHERE ticker = ?1 AND row_index = ?2",
            params![ticker, CANONICAL_ROW],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(query_err)?;

    conn.execute(
        "UPDATE instruments
         SET bars_count = ?1, first_date = ?2, last_date = ?3,
             data_source = COALESCE(?4, data_source),
             downloaded_at = COALESCE(?5, downloaded_at)
         WHERE ticker = ?6",
        params![
            count,
            first,
            last,
            source.map(|s| s.as_str()),
            at.map(|t| t.to_rfc3339()),
            ticker
        ],
    )
    .map_err(query_err)?;

    match load_instrument(conn, ticker)? {
        Some(instrument) => Ok(instrument.summary),
        None => Ok(InstrumentSummary {
            bars_count: count.max(0) as usize,
            first_date: parse_date_col(1, first).map_err(query_err)?,
            last_date: parse_date_col(2, last).map_err(query_err)?,
            data_source: source,
            downloaded_at: at,
        }),
    }
}

fn append_log(conn: &Connection, record: &DownloadRecord, stored: usize) -> Result<(), CascadeError> {
    conn.execute(
        "INSERT INTO download_log
            (ticker, started_at, finished_at, status, bars_found, bars_stored, error_msg, data_source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.ticker,
            record.started_at.to_rfc3339(),
            record.finished_at.to_rfc3339(),
            record.status.as_str(),
            record.bars_found as i64,
            stored as i64,
            record.error_msg,
            record.source.map(|s| s.as_str()),
        ],
    )
    .map_err(query_err)?;
    Ok(())
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, CascadeError> {
        let db_path =
            config
                .get_string("store", "path")
                .ok_or_else(|| CascadeError::ConfigMissing {
                    section: "store".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("store", "pool_size", 4).max(1) as u32;
        let busy_timeout = config.get_int("store", "busy_timeout_ms", 5000).max(0) as u64;

        let manager = SqliteConnectionManager::file(&db_path).with_init(move |c| {
            c.busy_timeout(Duration::from_millis(busy_timeout))
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(unavailable)?;

        Ok(Self {
            pool,
            location: db_path,
        })
    }

    pub fn in_memory() -> Result<Self, CascadeError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(unavailable)?;

        Ok(Self {
            pool,
            location: ":memory:".to_string(),
        })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, CascadeError> {
        self.pool.get().map_err(unavailable)
    }

    pub fn initialize_schema(&self) -> Result<(), CascadeError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }

    /// Writes bars verbatim, bypassing the merge rules. Used to seed a store.
    pub fn insert_bars(&self, bars: &[OhlcvBar]) -> Result<(), CascadeError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut touched = BTreeSet::new();
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO ohlcv
                    (ticker, date, open, high, low, close, volume, row_index, data_source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    bar.ticker,
                    bar.date.format(DATE_FMT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.row_index,
                    bar.source.as_str()
                ],
            )
            .map_err(query_err)?;
            touched.insert(bar.ticker.as_str());
        }
        for ticker in touched {
            refresh_summary(&tx, ticker, None, None)?;
        }
        tx.commit().map_err(query_err)
    }

    /// Disabling is the only removal mechanism; history is kept.
    pub fn set_enabled(&self, ticker: &str, enabled: bool) -> Result<bool, CascadeError> {
        let n = self
            .conn()?
            .execute(
                "UPDATE instruments SET enabled = ?1 WHERE ticker = ?2",
                params![enabled, ticker],
            )
            .map_err(query_err)?;
        Ok(n > 0)
    }

    /// Every stored row for one instrument, secondary rows included.
    pub fn all_rows(&self, ticker: &str) -> Result<Vec<OhlcvBar>, CascadeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ticker, date, open, high, low, close, volume, row_index, data_source
                 FROM ohlcv WHERE ticker = ?1
                 ORDER BY date ASC, row_index ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![ticker], bar_from_row)
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    pub fn download_log(&self, ticker: &str) -> Result<Vec<(String, usize, usize)>, CascadeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT status, bars_found, bars_stored FROM download_log
                 WHERE ticker = ?1 ORDER BY id ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![ticker], |row| {
                let found: i64 = row.get(1)?;
                let stored: i64 = row.get(2)?;
                Ok((row.get(0)?, found as usize, stored as usize))
            })
            .map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }
}

impl StorePort for SqliteStore {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn list_instruments(&self) -> Result<Vec<Instrument>, CascadeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INSTRUMENT_COLUMNS} FROM instruments ORDER BY ticker"
            ))
            .map_err(query_err)?;
        let rows = stmt.query_map([], instrument_from_row).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn get_instrument(&self, ticker: &str) -> Result<Option<Instrument>, CascadeError> {
        let conn = self.conn()?;
        load_instrument(&conn, ticker)
    }

    fn insert_instrument(&self, entry: &CatalogEntry) -> Result<Instrument, CascadeError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let taken = match entry.id {
            Some(id) if id > 0 => tx
                .query_row("SELECT 1 FROM instruments WHERE id = ?1", params![id], |_| Ok(()))
                .optional()
                .map_err(query_err)?
                .is_some(),
            _ => true,
        };
        let id: i64 = match entry.id {
            Some(id) if !taken => id,
            _ => tx
                .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM instruments", [], |row| {
                    row.get(0)
                })
                .map_err(query_err)?,
        };

        tx.execute(
            "INSERT INTO instruments
                (id, ticker, name, trading_type, settlement_type, enabled, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                entry.ticker,
                entry.name,
                entry.classification.as_str(),
                entry.settlement_type,
                entry.enabled,
                entry.description
            ],
        )
        .map_err(query_err)?;

        // bars may already exist for a ticker that was added ad hoc
        refresh_summary(&tx, &entry.ticker, None, None)?;
        let instrument = load_instrument(&tx, &entry.ticker)?.ok_or_else(|| {
            CascadeError::DatabaseQuery {
                reason: format!("instrument {} vanished after insert", entry.ticker),
            }
        })?;
        tx.commit().map_err(query_err)?;
        Ok(instrument)
    }

    fn canonical_bars(&self, ticker: &str) -> Result<Vec<OhlcvBar>, CascadeError> {
        let conn = self.conn()?;
        load_canonical(&conn, ticker)
    }

    fn commit_merge(
        &self,
        ticker: &str,
        fetched: &[OhlcvBar],
        mode: &MergeMode,
        priority: &SourcePriority,
        record: &DownloadRecord,
    ) -> Result<CommitOutcome, CascadeError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let existing: BTreeMap<NaiveDate, OhlcvBar> = load_canonical(&tx, ticker)?
            .into_iter()
            .map(|b| (b.date, b))
            .collect();
        let plan = plan_merge(&existing, fetched, mode, priority);

        {
            let mut upsert = tx
                .prepare(
                    "INSERT INTO ohlcv
                        (ticker, date, open, high, low, close, volume, row_index, data_source)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(ticker, date, row_index) DO UPDATE SET
                        open = excluded.open,
                        high = excluded.high,
                        low = excluded.low,
                        close = excluded.close,
                        volume = excluded.volume,
                        data_source = excluded.data_source",
                )
                .map_err(query_err)?;
            for action in &plan.actions {
                let bar = action.bar();
                upsert
                    .execute(params![
                        ticker,
                        bar.date.format(DATE_FMT).to_string(),
                        bar.open,
                        bar.high,
                        bar.low,
                        bar.close,
                        bar.volume,
                        CANONICAL_ROW,
                        bar.source.as_str()
                    ])
                    .map_err(query_err)?;
            }
        }

        // a merge that writes nothing leaves provenance and download time as they were
        let (source, at) = if plan.is_empty() {
            (None, None)
        } else {
            (record.source, Some(record.finished_at))
        };
        let summary = refresh_summary(&tx, ticker, source, at)?;
        append_log(&tx, record, plan.written())?;
        tx.commit().map_err(query_err)?;

        Ok(CommitOutcome::from_plan(&plan, summary))
    }

    fn record_download(&self, record: &DownloadRecord) -> Result<(), CascadeError> {
        let conn = self.conn()?;
        append_log(&conn, record, record.bars_stored)
    }

    fn rows_from_source(
        &self,
        classification: Classification,
        source: SourceId,
    ) -> Result<BTreeMap<String, BTreeSet<NaiveDate>>, CascadeError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT o.ticker, o.date
                 FROM ohlcv o
                 JOIN instruments i ON i.ticker = o.ticker
                 WHERE i.trading_type = ?1 AND o.data_source = ?2 AND o.row_index = ?3
                 ORDER BY o.ticker, o.date",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![classification.as_str(), source.as_str(), CANONICAL_ROW],
                |row| {
                    let ticker: String = row.get(0)?;
                    let date: String = row.get(1)?;
                    Ok((ticker, parse_date_col(1, Some(date))?))
                },
            )
            .map_err(query_err)?;

        let mut grouped: BTreeMap<String, BTreeSet<NaiveDate>> = BTreeMap::new();
        for row in rows {
            let (ticker, date) = row.map_err(query_err)?;
            if let Some(date) = date {
                grouped.entry(ticker).or_default().insert(date);
            }
        }
        Ok(grouped)
    }

    fn status(&self) -> Result<StoreStatus, CascadeError> {
        let conn = self.conn()?;
        let mut status = StoreStatus::default();

        let mut stmt = conn
            .prepare(
                "SELECT trading_type, enabled, COUNT(*),
                        SUM(CASE WHEN bars_count > 0 THEN 1 ELSE 0 END),
                        SUM(bars_count)
                 FROM instruments
                 GROUP BY trading_type, enabled",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                let class: String = row.get(0)?;
                let enabled: bool = row.get(1)?;
                let count: i64 = row.get(2)?;
                let with_data: i64 = row.get(3)?;
                let bars: i64 = row.get(4)?;
                Ok((parse_col::<Classification>(0, &class)?, enabled, count, with_data, bars))
            })
            .map_err(query_err)?;
        for row in rows {
            let (class, enabled, count, with_data, bars) = row.map_err(query_err)?;
            let entry: &mut ClassificationStatus =
                status.by_classification.entry(class).or_default();
            if enabled {
                entry.enabled += count as usize;
            } else {
                entry.disabled += count as usize;
            }
            entry.with_data += with_data as usize;
            entry.bars += bars as usize;
        }

        let (count, first, last): (i64, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT COUNT(*), MIN(date), MAX(date) FROM ohlcv WHERE row_index = ?1",
                params![CANONICAL_ROW],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;
        status.canonical_bars = count as usize;
        status.first_date = parse_date_col(1, first).map_err(query_err)?;
        status.last_date = parse_date_col(2, last).map_err(query_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT data_source, COUNT(DISTINCT ticker) FROM ohlcv
                 WHERE row_index = ?1 GROUP BY data_source",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![CANONICAL_ROW], |row| {
                let source: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                Ok((parse_col::<SourceId>(0, &source)?, n as usize))
            })
            .map_err(query_err)?;
        for row in rows {
            let (source, n) = row.map_err(query_err)?;
            status.instruments_by_source.insert(source, n);
        }

        let logged: i64 = conn
            .query_row("SELECT COUNT(*) FROM download_log", [], |row| row.get(0))
            .map_err(query_err)?;
        status.download_log_rows = logged as usize;

        Ok(status)
    }
}
