//! Read-only access to the agent's SQLite datastore.
//!
//! The agent owns the write path; this module only runs the queries the tray
//! and CLI need:
//!
//! ```text
//! suggestions(id, ts, check_name, severity, message, fix_cmd, status)
//! metrics(ts, cpu, mem_used, mem_total, load1, load5, load15)
//! ```
//!
//! A fresh connection is opened per query so a restarted or replaced database
//! file is picked up on the next poll.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::{KyaError, Result};
use crate::suggestion::{MetricsSample, Severity, SuggestionRecord, SuggestionStatus};

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const SELECT_SUGGESTION: &str =
    "SELECT id, ts, check_name, severity, message, fix_cmd, status FROM suggestions";

// ---------------------------------------------------------------------------
// SuggestionSource
// ---------------------------------------------------------------------------

/// The query surface the change feed depends on.
pub trait SuggestionSource: Send + Sync {
    /// Highest id among open suggestions, `None` when there are none.
    fn max_open_id(&self) -> Result<Option<i64>>;

    /// Open suggestions with `id > after`, ascending by id.
    fn open_since(&self, after: i64) -> Result<Vec<SuggestionRecord>>;
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// All open suggestions, newest first.
    pub fn list_open(&self) -> Result<Vec<SuggestionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SUGGESTION} WHERE status = 'open' ORDER BY id DESC"
        ))?;
        let rows = stmt.query_map([], suggestion_from_row)?;
        decode_rows(rows)
    }

    /// Look up a single suggestion regardless of status.
    pub fn get(&self, id: i64) -> Result<Option<SuggestionRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!("{SELECT_SUGGESTION} WHERE id = ?1"),
                params![id],
                suggestion_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Suggestion `id`, provided it exists and is still open.
    pub fn open_suggestion(&self, id: i64) -> Result<SuggestionRecord> {
        match self.get(id)? {
            None => Err(KyaError::SuggestionNotFound(id)),
            Some(r) if r.status.is_terminal() => Err(KyaError::SuggestionClosed {
                id,
                status: r.status.as_str().to_string(),
            }),
            Some(r) => Ok(r),
        }
    }

    /// The most recent metrics sample, if the agent has written any.
    pub fn latest_sample(&self) -> Result<Option<MetricsSample>> {
        let conn = self.connect()?;
        let sample = conn
            .query_row(
                "SELECT ts, cpu, mem_used, mem_total, load1, load5, load15 \
                 FROM metrics ORDER BY ts DESC LIMIT 1",
                [],
                |row| {
                    Ok(MetricsSample {
                        timestamp: row.get::<_, f64>(0)? as i64,
                        cpu: row.get(1)?,
                        mem_used: row.get(2)?,
                        mem_total: row.get(3)?,
                        load1: row.get(4)?,
                        load5: row.get(5)?,
                        load15: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(sample)
    }
}

impl SuggestionSource for SqliteStore {
    fn max_open_id(&self) -> Result<Option<i64>> {
        let conn = self.connect()?;
        let max = conn.query_row(
            "SELECT max(id) FROM suggestions WHERE status = 'open'",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(max)
    }

    fn open_since(&self, after: i64) -> Result<Vec<SuggestionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SUGGESTION} WHERE status = 'open' AND id > ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![after], suggestion_from_row)?;
        decode_rows(rows)
    }
}

/// Collect decoded rows, skipping the ones that cannot be decoded.
///
/// A row the agent wrote badly must not hide the rows after it, so decode
/// failures are logged and dropped. Any other error fails the query.
fn decode_rows(
    rows: impl Iterator<Item = rusqlite::Result<SuggestionRecord>>,
) -> Result<Vec<SuggestionRecord>> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(record) => out.push(record),
            Err(
                e @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => tracing::warn!(error = %e, "skipping undecodable suggestion row"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

// Columns are decoded leniently: the agent's schema is not ours to trust.
fn suggestion_from_row(row: &Row<'_>) -> rusqlite::Result<SuggestionRecord> {
    let status = text_column(row, 6)?;
    let status = status
        .parse::<SuggestionStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let severity = text_column(row, 3)?;
    let fix_command = text_column(row, 5)?;
    Ok(SuggestionRecord {
        id: row.get(0)?,
        timestamp: timestamp_column(row, 1)?,
        check_name: text_column(row, 2)?,
        severity: if severity.is_empty() {
            Severity::Info
        } else {
            Severity::parse(&severity)
        },
        message: text_column(row, 4)?,
        fix_command: Some(fix_command).filter(|s| !s.is_empty()),
        status,
    })
}

fn text_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    })
}

// The agent writes `ts` from a float clock; anything unreadable becomes 0.
fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) => f as i64,
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map_or(0, |f| f as i64),
        ValueRef::Null | ValueRef::Blob(_) => 0,
    })
}

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------
