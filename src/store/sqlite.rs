//! SQLite-backed [`KvStore`]: one file, one table per store, JSON payloads.

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{KvStore, Record, Tables};
use crate::utils::config::DB_BUSY_TIMEOUT;

/// WAL tuning pragmas. Use after PRAGMA journal_mode = WAL.
const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

fn table_schema(table: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, data TEXT NOT NULL);")
}

/// Enable WAL and apply schema to an open connection (idempotent).
fn apply_wal_and_schema(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    apply_schema(conn)
}

fn apply_schema(conn: &Connection) -> Result<()> {
    for table in Tables::ALL {
        conn.execute_batch(&table_schema(table))
            .with_context(|| format!("create table {table}"))?;
    }
    Ok(())
}

/// Shared handle to the state database. Hand out per-table stores with [`SqliteDb::table`].
#[derive(Clone)]
pub struct SqliteDb {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDb {
    /// Open or create the state DB and ensure schema + WAL.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database {}", path.display()))?;
        conn.busy_timeout(DB_BUSY_TIMEOUT)
            .context("set busy timeout")?;
        apply_wal_and_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory DB with the same schema (no WAL).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Store over one of [`Tables::ALL`].
    pub fn table(&self, table: &'static str) -> Result<SqliteStore> {
        if !Tables::ALL.contains(&table) {
            return Err(anyhow!("unknown table {table}"));
        }
        Ok(SqliteStore {
            conn: Arc::clone(&self.conn),
            table,
        })
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    table: &'static str,
}

impl SqliteStore {
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Record>> {
        let sql = format!("SELECT data FROM {} WHERE id = ?1", self.table);
        let data: Option<String> = self
            .conn()
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()
            .with_context(|| format!("{}: read {key}", self.table))?;
        data.map(|s| {
            serde_json::from_str(&s).with_context(|| format!("{}: decode {key}", self.table))
        })
        .transpose()
    }

    fn put(&self, key: &str, record: &Record) -> Result<()> {
        let data = serde_json::to_string(record)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, data) VALUES (?1, ?2)",
            self.table
        );
        self.conn()
            .execute(&sql, params![key, data])
            .with_context(|| format!("{}: write {key}", self.table))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        self.conn()
            .execute(&sql, params![key])
            .with_context(|| format!("{}: delete {key}", self.table))?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT id FROM {} ORDER BY id", self.table);
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}
