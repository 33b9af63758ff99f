use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use crate::cache::SharedCache;
use crate::error::{QueueError, Result};

/// Initialise the cache schema in `conn`.
///
/// `cache_list.seq` is monotonically increasing, so `ORDER BY seq` is
/// insertion order and the lowest `seq` of a list is its head.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cache_kv (
            key    TEXT NOT NULL PRIMARY KEY,
            value  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS cache_list (
            seq    INTEGER PRIMARY KEY AUTOINCREMENT,
            list   TEXT NOT NULL,
            value  TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_cache_list_list_seq ON cache_list (list, seq);
        ",
    )
    .map_err(QueueError::sqlite("init"))?;
    Ok(())
}

/// Shared cache kept in two SQLite tables.
///
/// Several processes (scheduler, workers, jobctl) may open the same file;
/// WAL mode plus a busy timeout lets them interleave safely.
pub struct SqliteCache {
    db: Mutex<Connection>,
}

impl SqliteCache {
    /// Wrap an already-open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path).map_err(QueueError::sqlite("open"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(QueueError::sqlite("open"))?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory().map_err(QueueError::sqlite("open"))?)
    }
}

#[async_trait]
impl SharedCache for SqliteCache {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().expect("cache connection poisoned");
        db.query_row("SELECT value FROM cache_kv WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(QueueError::sqlite("get"))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().expect("cache connection poisoned");
        db.execute(
            "INSERT INTO cache_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )
        .map_err(QueueError::sqlite("set"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db = self.db.lock().expect("cache connection poisoned");
        db.execute("DELETE FROM cache_kv WHERE key = ?1", [key])
            .map_err(QueueError::sqlite("delete"))?;
        Ok(())
    }

    async fn set_and_push(&self, key: &str, value: &str, list: &str, item: &str) -> Result<()> {
        let mut db = self.db.lock().expect("cache connection poisoned");
        let tx = db.transaction().map_err(QueueError::sqlite("set_and_push"))?;
        tx.execute(
            "INSERT INTO cache_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )
        .map_err(QueueError::sqlite("set_and_push"))?;
        tx.execute(
            "INSERT INTO cache_list (list, value) VALUES (?1, ?2)",
            [list, item],
        )
        .map_err(QueueError::sqlite("set_and_push"))?;
        tx.commit().map_err(QueueError::sqlite("set_and_push"))?;
        Ok(())
    }

    async fn pop_front(&self, list: &str) -> Result<Option<String>> {
        let db = self.db.lock().expect("cache connection poisoned");
        // Single statement: SQLite's write lock makes it exclusive across
        // processes sharing the file.
        db.query_row(
            "DELETE FROM cache_list
             WHERE seq = (SELECT MIN(seq) FROM cache_list WHERE list = ?1)
             RETURNING value",
            [list],
            |row| row.get(0),
        )
        .optional()
        .map_err(QueueError::sqlite("pop_front"))
    }

    async fn list(&self, list: &str) -> Result<Vec<String>> {
        let db = self.db.lock().expect("cache connection poisoned");
        let mut stmt = db
            .prepare_cached("SELECT value FROM cache_list WHERE list = ?1 ORDER BY seq")
            .map_err(QueueError::sqlite("list"))?;
        let rows = stmt
            .query_map([list], |row| row.get::<_, String>(0))
            .map_err(QueueError::sqlite("list"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(QueueError::sqlite("list"))?;
        Ok(rows)
    }
}
