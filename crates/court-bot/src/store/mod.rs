//! SQLite persistence layer.
//!
//! One connection per process; WAL journaling lets the 2-minute order
//! manager and the 15-minute scheduler read and write concurrently. All
//! money columns are stored as decimal TEXT to avoid float drift, and all
//! timestamps as RFC 3339 UTC.

pub mod jobs;
pub mod merges;
pub mod models;
pub mod results;
pub mod risk;
pub mod schema;
pub mod signals;

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

pub use jobs::{JobSummary, MergeCandidate, NewJob};
pub use merges::NewMergeOperation;
pub use results::BandOutcome;
pub use models::{
    JobStatus, MergeOpStatus, MergeOperation, MergeStatus, OrderEvent, OrderEventType, OrderStatus,
    RiskLevel, RiskSnapshot, Signal, TradeJob, TradeResult,
};
pub use signals::NewSignal;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("illegal {entity} transition {from} -> {to} (id {id})")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
        id: i64,
    },

    #[error("row not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle over the single SQLite file.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database, apply pragmas and schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Tier-3 health: full integrity check. Logs and returns the verdict.
    pub fn integrity_check(&self) -> StoreResult<bool> {
        let verdict: String =
            self.conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        let ok = verdict == "ok";
        info!(ok, "SQLite integrity check");
        Ok(ok)
    }
}

// --- Column helpers shared by the query modules ---
//
// Parse failures become rusqlite conversion errors so row mappers compose
// with query_map / query_row unchanged.

fn conversion_err(col: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        format!("corrupt column {col}: {value}").into(),
    )
}

pub(crate) fn get_decimal(row: &Row<'_>, col: &str) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(col)?;
    raw.parse().map_err(|_| conversion_err(col, &raw))
}

pub(crate) fn get_decimal_opt(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(col)?;
    match raw {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| conversion_err(col, &s)),
    }
}

pub(crate) fn get_parsed<T: std::str::FromStr>(row: &Row<'_>, col: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    raw.parse().map_err(|_| conversion_err(col, &raw))
}

pub(crate) fn get_parsed_opt<T: std::str::FromStr>(
    row: &Row<'_>,
    col: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(col)?;
    match raw {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| conversion_err(col, &s)),
    }
}

pub(crate) fn dec_str(v: Decimal) -> String {
    v.to_string()
}

pub(crate) fn dec_str_opt(v: Option<Decimal>) -> Option<String> {
    v.map(|d| d.to_string())
}

pub(crate) fn ts(v: DateTime<Utc>) -> String {
    v.to_rfc3339()
}

pub(crate) fn get_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| conversion_err(col, &raw))
}

pub(crate) fn get_ts_opt(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(col)?;
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| conversion_err(col, &s)),
    }
}
