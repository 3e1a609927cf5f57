use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use fleet_core::{local_now_ms, EpochMs, FleetError, Result, SkewClock};
use rusqlite::{Connection, Params, Row, Transaction, TransactionBehavior};
use tracing::info;

const STORE_NOW_SQL: &str =
    "SELECT CAST(ROUND((julianday('now') - 2440587.5) * 86400000.0) AS INTEGER)";

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Length of a granted or renewed lease.
    pub lease_seconds: i64,
    pub busy_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            lease_seconds: 300,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// A connection to the authoritative store plus the clock offset measured when
/// it was opened. Every operation goes through a session; nothing is global.
pub struct Session {
    pub(crate) conn: Connection,
    clock: SkewClock,
    options: SessionOptions,
}

impl Session {
    pub fn open(db_path: &Path, options: SessionOptions) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).ctx("open database")?;
        Self::from_connection(conn, options)
    }

    pub fn open_in_memory(options: SessionOptions) -> Result<Self> {
        let conn = Connection::open_in_memory().ctx("open in-memory database")?;
        Self::from_connection(conn, options)
    }

    fn from_connection(conn: Connection, options: SessionOptions) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout).ctx("set busy timeout")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ctx("enable foreign keys")?;
        // in-memory databases answer "memory"
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .ctx("set journal mode")?;
        conn.execute_batch(include_str!("../migrations/0001_init.sql"))
            .ctx("migrate schema")?;

        let store_now: i64 = conn
            .query_row(STORE_NOW_SQL, [], |r| r.get(0))
            .map_err(|e| FleetError::Clock(e.to_string()))?;
        let local_now = local_now_ms();
        let clock = SkewClock::measure(store_now, local_now);
        info!(
            store_now,
            local_now,
            offset_ms = clock.offset_ms(),
            adjusted_now = clock.adjust(local_now),
            "measured store clock"
        );

        Ok(Self { conn, clock, options })
    }

    /// Replace the measured clock offset.
    pub fn with_clock(mut self, clock: SkewClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> SkewClock {
        self.clock
    }

    /// Local time corrected towards the store's clock.
    pub fn now(&self) -> EpochMs {
        self.clock.now_ms()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn lease_deadline(&self, now: EpochMs) -> EpochMs {
        now + self.options.lease_seconds * 1000
    }

    pub(crate) fn begin(&self) -> Result<Transaction<'_>> {
        self.conn.unchecked_transaction().ctx("begin transaction")
    }

    /// Takes the write lock up front so a select-then-claim cannot interleave
    /// with another host's claim.
    pub(crate) fn begin_immediate(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .ctx("begin immediate transaction")
    }
}

pub(crate) trait SqlContext<T> {
    fn ctx(self, what: &str) -> Result<T>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn ctx(self, what: &str) -> Result<T> {
        self.map_err(|e| FleetError::Transaction(format!("{what}: {e}")))
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

/// Zero rows is `None`, a second row is corruption.
pub(crate) fn query_unique<T, P, F>(
    conn: &Connection,
    sql: &str,
    params: P,
    entity: &'static str,
    key: impl Display,
    map: F,
) -> Result<Option<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare_cached(sql).ctx(entity)?;
    let mut rows = stmt.query_map(params, map).ctx(entity)?;
    let first = match rows.next() {
        None => return Ok(None),
        Some(row) => row.ctx(entity)?,
    };
    if rows.next().is_some() {
        return Err(FleetError::corruption(entity, key));
    }
    Ok(Some(first))
}

pub(crate) fn expect_unique<T, P, F>(
    conn: &Connection,
    sql: &str,
    params: P,
    entity: &'static str,
    key: impl Display,
    map: F,
) -> Result<T>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let key = key.to_string();
    query_unique(conn, sql, params, entity, &key, map)?
        .ok_or_else(|| FleetError::not_found(entity, key))
}

pub(crate) fn query_list<T, P, F>(conn: &Connection, sql: &str, params: P, what: &str, map: F) -> Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare_cached(sql).ctx(what)?;
    let rows = stmt.query_map(params, map).ctx(what)?;
    let mut out = vec![];
    for row in rows {
        out.push(row.ctx(what)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_and_migrate_twice() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("fleet.db");
        let _ = Session::open(&db_path, SessionOptions::default()).unwrap();
        let s = Session::open(&db_path, SessionOptions::default()).unwrap();
        let n: i64 = s
            .conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='revisionwork'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn clock_tracks_store_time() {
        let s = Session::open_in_memory(SessionOptions::default()).unwrap();
        // the store and this process share a clock; allow rounding and slow CI
        assert!(s.clock().offset_ms().abs() < 5_000);
        let shifted = s.with_clock(SkewClock::from_offset(60_000));
        assert!(shifted.now() - local_now_ms() >= 59_000);
    }

    #[test]
    fn lease_deadline_uses_configured_length() {
        let s = Session::open_in_memory(SessionOptions { lease_seconds: 10, ..Default::default() }).unwrap();
        assert_eq!(s.lease_deadline(1_000), 11_000);
    }
}
