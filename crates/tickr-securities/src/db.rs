use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::{ReconcileError, Result};
use crate::snapshot::Snapshot;
use crate::types::{SecurityRow, TickerEntry};

/// Create the securities table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // Dates are ISO-8601 text so that string order is date order.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS securities (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            security_id      INTEGER NOT NULL,
            ticker           TEXT NOT NULL,
            figi             TEXT NOT NULL DEFAULT '',
            min_date         TEXT,
            max_date         TEXT,
            cik              TEXT,
            name             TEXT,
            market           TEXT,
            locale           TEXT,
            primary_exchange TEXT,
            market_cap       REAL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_securities_ticker ON securities(ticker, max_date);
        CREATE INDEX IF NOT EXISTS idx_securities_figi ON securities(figi);
        CREATE INDEX IF NOT EXISTS idx_securities_security_id ON securities(security_id);",
    )
}

const ROW_COLUMNS: &str = "id, security_id, ticker, figi, min_date, max_date, cik, name";

// NULL max_date sorts first: an active row is the most recent one.
const LATEST_FIRST: &str = "ORDER BY max_date IS NULL DESC, max_date DESC, id DESC";

fn row_to_security(row: &rusqlite::Row<'_>) -> rusqlite::Result<SecurityRow> {
    Ok(SecurityRow {
        id: row.get(0)?,
        security_id: row.get(1)?,
        ticker: row.get(2)?,
        figi: row.get(3)?,
        min_date: row.get(4)?,
        max_date: row.get(5)?,
        cik: row.get(6)?,
        name: row.get(7)?,
    })
}

/// The persisted securities table.
///
/// Every method takes the connection lock for one statement only. Day-level
/// atomicity comes from [`begin`](Self::begin) / [`commit`](Self::commit),
/// record-level atomicity from [`atomically`](Self::atomically).
pub struct SecuritiesDb {
    db: Mutex<Connection>,
}

impl SecuritiesDb {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn).map_err(ReconcileError::db("init_db"))?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(ReconcileError::db("open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(ReconcileError::db("pragma"))?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(ReconcileError::db("open"))?;
        Self::new(conn)
    }

    fn with_conn<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.db.lock().unwrap();
        f(&conn).map_err(ReconcileError::db(op))
    }

    // ── Transactions ────────────────────────────────────────────────────────

    pub fn begin(&self) -> Result<()> {
        self.with_conn("begin", |c| c.execute_batch("BEGIN IMMEDIATE"))
    }

    pub fn commit(&self) -> Result<()> {
        self.with_conn("commit", |c| c.execute_batch("COMMIT"))
    }

    pub fn rollback(&self) -> Result<()> {
        self.with_conn("rollback", |c| c.execute_batch("ROLLBACK"))
    }

    /// Run `f` under a savepoint: its writes all land, or none of them do.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.with_conn("savepoint", |c| c.execute_batch("SAVEPOINT record"))?;
        match f(self) {
            Ok(value) => {
                self.with_conn("release", |c| c.execute_batch("RELEASE record"))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = self.with_conn("rollback_to", |c| {
                    c.execute_batch("ROLLBACK TO record; RELEASE record")
                }) {
                    warn!("rollback to savepoint failed: {rb}");
                }
                Err(e)
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        !self.db.lock().unwrap().is_autocommit()
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub fn has_any_row(&self) -> Result<bool> {
        self.with_conn("has_any_row", |c| {
            c.query_row("SELECT EXISTS(SELECT 1 FROM securities)", [], |r| r.get(0))
        })
    }

    pub fn has_rows(&self, ticker: &str) -> Result<bool> {
        self.with_conn("has_rows", |c| {
            c.query_row(
                "SELECT EXISTS(SELECT 1 FROM securities WHERE ticker = ?1)",
                params![ticker],
                |r| r.get(0),
            )
        })
    }

    /// The newest `min_date` in the table, where an incremental walk resumes.
    pub fn latest_min_date(&self) -> Result<Option<NaiveDate>> {
        self.with_conn("latest_min_date", |c| {
            c.query_row("SELECT MAX(min_date) FROM securities", [], |r| r.get(0))
        })
    }

    /// Most recent row carrying `figi`. Never call with an empty FIGI.
    pub fn latest_by_figi(&self, figi: &str) -> Result<Option<SecurityRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM securities WHERE figi = ?1 {LATEST_FIRST} LIMIT 1"
        );
        self.with_conn("latest_by_figi", |c| {
            c.query_row(&sql, params![figi], row_to_security).optional()
        })
    }

    pub fn latest_by_ticker(&self, ticker: &str) -> Result<Option<SecurityRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM securities WHERE ticker = ?1 {LATEST_FIRST} LIMIT 1"
        );
        self.with_conn("latest_by_ticker", |c| {
            c.query_row(&sql, params![ticker], row_to_security).optional()
        })
    }

    pub fn active_by_ticker(&self, ticker: &str) -> Result<Option<SecurityRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM securities
             WHERE ticker = ?1 AND max_date IS NULL ORDER BY id DESC LIMIT 1"
        );
        self.with_conn("active_by_ticker", |c| {
            c.query_row(&sql, params![ticker], row_to_security).optional()
        })
    }

    /// Whether any row of `figi`'s chain other than `exclude_id` used `ticker`.
    pub fn figi_history_has_ticker(&self, figi: &str, ticker: &str, exclude_id: i64) -> Result<bool> {
        self.with_conn("figi_history_has_ticker", |c| {
            c.query_row(
                "SELECT EXISTS(SELECT 1 FROM securities WHERE figi = ?1 AND ticker = ?2 AND id != ?3)",
                params![figi, ticker, exclude_id],
                |r| r.get(0),
            )
        })
    }

    /// All rows for `ticker`, oldest first.
    pub fn rows_for_ticker(&self, ticker: &str) -> Result<Vec<SecurityRow>> {
        let sql = format!("SELECT {ROW_COLUMNS} FROM securities WHERE ticker = ?1 ORDER BY id");
        self.with_conn("rows_for_ticker", |c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(params![ticker], row_to_security)?;
            rows.collect()
        })
    }

    pub fn active_rows(&self) -> Result<Vec<SecurityRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM securities WHERE max_date IS NULL ORDER BY ticker, id"
        );
        self.with_conn("active_rows", |c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_security)?;
            rows.collect()
        })
    }

    /// Active rows as a snapshot, standing in for "yesterday" in the
    /// one-day top-up.
    pub fn active_snapshot(&self) -> Result<Snapshot> {
        let rows = self.active_rows()?;
        Ok(rows
            .into_iter()
            .map(|r| TickerEntry::new(r.ticker, r.figi))
            .collect())
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Insert a listing opened on `min_date`. With `security_id = None` a new
    /// lineage id is allocated. Returns the row id.
    pub fn insert_listing(
        &self,
        entry: &TickerEntry,
        min_date: NaiveDate,
        security_id: Option<i64>,
    ) -> Result<i64> {
        self.with_conn("insert_listing", |c| {
            let security_id = match security_id {
                Some(id) => id,
                None => c.query_row(
                    "SELECT COALESCE(MAX(security_id), 0) + 1 FROM securities",
                    [],
                    |r| r.get(0),
                )?,
            };
            c.execute(
                "INSERT INTO securities
                    (security_id, ticker, figi, min_date, cik, name, market, locale, primary_exchange)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    security_id,
                    entry.ticker,
                    entry.composite_figi,
                    min_date,
                    entry.cik,
                    entry.name,
                    entry.market,
                    entry.locale,
                    entry.primary_exchange,
                ],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    /// Set the FIGI on the active row for `ticker`. Returns rows affected.
    pub fn update_active_figi(&self, ticker: &str, figi: &str) -> Result<usize> {
        self.with_conn("update_active_figi", |c| {
            c.execute(
                "UPDATE securities SET figi = ?2 WHERE ticker = ?1 AND max_date IS NULL",
                params![ticker, figi],
            )
        })
    }

    /// Clear `max_date`, optionally replacing the FIGI in the same statement.
    pub fn reopen(&self, row_id: i64, figi: Option<&str>) -> Result<()> {
        self.with_conn("reopen", |c| {
            c.execute(
                "UPDATE securities SET max_date = NULL, figi = COALESCE(?2, figi) WHERE id = ?1",
                params![row_id, figi],
            )
            .map(|_| ())
        })
    }

    pub fn set_figi(&self, row_id: i64, figi: &str) -> Result<()> {
        self.with_conn("set_figi", |c| {
            c.execute("UPDATE securities SET figi = ?2 WHERE id = ?1", params![row_id, figi])
                .map(|_| ())
        })
    }

    pub fn set_max_date(&self, row_id: i64, date: NaiveDate) -> Result<()> {
        self.with_conn("set_max_date", |c| {
            c.execute("UPDATE securities SET max_date = ?2 WHERE id = ?1", params![row_id, date])
                .map(|_| ())
        })
    }

    /// Close the active row for `ticker`. Returns rows affected.
    pub fn close_active(&self, ticker: &str, date: NaiveDate) -> Result<usize> {
        self.with_conn("close_active", |c| {
            c.execute(
                "UPDATE securities SET max_date = ?2 WHERE ticker = ?1 AND max_date IS NULL",
                params![ticker, date],
            )
        })
    }

    /// Set `cik` on active rows for `ticker` whose value is missing or stale.
    pub fn set_cik(&self, ticker: &str, cik: &str) -> Result<usize> {
        self.with_conn("set_cik", |c| {
            c.execute(
                "UPDATE securities SET cik = ?2
                 WHERE ticker = ?1 AND max_date IS NULL AND (cik IS NULL OR cik != ?2)",
                params![ticker, cik],
            )
        })
    }
}
