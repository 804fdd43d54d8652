mod snapshots;

pub use self::snapshots::{PortfolioCache, SnapshotStore};

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS rank_cache (
    key         VARCHAR PRIMARY KEY,
    value       VARCHAR NOT NULL,
    created_at  TIMESTAMP NOT NULL,
    -- NULL = kept until swept by key date
    expires_at  TIMESTAMP
);

CREATE TABLE IF NOT EXISTS portfolio_cache (
    key         VARCHAR PRIMARY KEY,
    value       VARCHAR NOT NULL,
    created_at  TIMESTAMP NOT NULL,
    expires_at  TIMESTAMP
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

/// The two independent key/value stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTable {
    Rank,
    Portfolio,
}

impl CacheTable {
    fn name(&self) -> &'static str {
        match self {
            Self::Rank => "rank_cache",
            Self::Portfolio => "portfolio_cache",
        }
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Key/value cache over DuckDB. Values are opaque serialized strings.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("cache connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Value for `key`, ignoring any expiry.
    pub fn get(&self, table: CacheTable, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let sql = format!("SELECT value FROM {} WHERE key = ?", table.name());
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![key], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row.with_context(|| format!("read {}", key))?)),
            None => Ok(None),
        }
    }

    /// Value for `key` unless it has expired by `now`.
    pub fn get_live(&self, table: CacheTable, key: &str, now: NaiveDateTime) -> Result<Option<String>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT value FROM {} WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
            table.name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![key, now], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row.with_context(|| format!("read {}", key))?)),
            None => Ok(None),
        }
    }

    /// Keys starting with `prefix`, each with the time it was last written.
    pub fn keys_with_prefix(&self, table: CacheTable, prefix: &str) -> Result<Vec<(String, NaiveDateTime)>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT key, created_at FROM {} WHERE starts_with(key, ?) ORDER BY key",
            table.name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let keys: Vec<(String, NaiveDateTime)> = stmt
            .query_map(params![prefix], |r| Ok((r.get(0)?, r.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }

    pub fn count(&self, table: CacheTable) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare(&format!("SELECT COUNT(*) FROM {}", table.name()))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Replace every listed key in one transaction. Prior values are deleted,
    /// never merged.
    pub fn replace_all(
        &self,
        table: CacheTable,
        entries: &[(&str, &str)],
        now: NaiveDateTime,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<usize> {
        if entries.is_empty() { return Ok(0); }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let delete = format!("DELETE FROM {} WHERE key = ?", table.name());
        let insert = format!(
            "INSERT INTO {} (key, value, created_at, expires_at) VALUES (?, ?, ?, ?)",
            table.name()
        );

        for (key, value) in entries {
            tx.execute(&delete, params![key])
                .with_context(|| format!("delete {}", key))?;
            tx.execute(&insert, params![key, value, now, expires_at])
                .with_context(|| format!("insert {}", key))?;
        }

        tx.commit()?;
        Ok(entries.len())
    }

    pub fn put(
        &self,
        table: CacheTable,
        key: &str,
        value: &str,
        now: NaiveDateTime,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<()> {
        self.replace_all(table, &[(key, value)], now, expires_at)?;
        Ok(())
    }

    pub fn delete(&self, table: CacheTable, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(&format!("DELETE FROM {} WHERE key = ?", table.name()), params![key])?;
        Ok(n > 0)
    }

    /// Drop rows whose explicit expiry has passed.
    pub fn delete_expired(&self, table: CacheTable, now: NaiveDateTime) -> Result<usize> {
        let conn = self.conn()?;
        let n = conn.execute(
            &format!(
                "DELETE FROM {} WHERE expires_at IS NOT NULL AND expires_at <= ?",
                table.name()
            ),
            params![now],
        )?;
        Ok(n)
    }
}
