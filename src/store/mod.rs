//! Persistence for merge requests, batches and the audit log.
//!
//! Backed by SQLite. A single [`Store`] is shared by every project loop;
//! each loop only mutates the rows of its own project.

mod batches;
pub mod pool;
mod records;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use pool::DbPool;
use std::path::Path;
use tracing::{debug, info};

/// Ordered schema migrations
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Handle to the merge-assist database
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Migration(format!("failed to create database directory: {e}"))
            })?;
        }

        let pool = pool::create_pool(path).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path = %path.display(), "database ready");
        Ok(store)
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let store = Self {
            pool: pool::create_memory_pool().await?,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Underlying pool
    pub const fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            ",
        )
        .execute(&mut *conn)
        .await?;

        for (name, sql) in MIGRATIONS {
            let applied: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
                    .bind(*name)
                    .fetch_optional(&mut *conn)
                    .await?;
            if applied.is_some() {
                continue;
            }

            for statement in parse_sql_statements(sql) {
                sqlx::query(&statement)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| Error::Migration(format!("{name}: {e}")))?;
            }

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(*name)
                .execute(&mut *conn)
                .await?;
            debug!(migration = *name, "applied migration");
        }

        Ok(())
    }
}

/// Split a migration file into statements.
///
/// Skips `--` comments and ignores semicolons inside parentheses.
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut paren_depth: u32 = 0;

    for line in sql.lines() {
        let line = line.find("--").map_or(line, |idx| &line[..idx]);

        for ch in line.chars() {
            match ch {
                '(' => {
                    paren_depth += 1;
                    current.push(ch);
                }
                ')' => {
                    paren_depth = paren_depth.saturating_sub(1);
                    current.push(ch);
                }
                ';' if paren_depth == 0 => {
                    let stmt = current.trim().to_string();
                    if !stmt.is_empty() {
                        statements.push(stmt);
                    }
                    current.clear();
                }
                _ => current.push(ch),
            }
        }

        if !current.is_empty() {
            current.push(' ');
        }
    }

    let last = current.trim();
    if !last.is_empty() {
        statements.push(last.to_string());
    }

    statements
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Invariant(format!("timestamp out of range: {millis}")))
}

pub(crate) fn to_db_id(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Invariant(format!("id {value} exceeds i64")))
}

pub(crate) fn from_db_id(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Invariant(format!("negative id {value} in database")))
}

pub(crate) fn from_db_count(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Invariant(format!("count {value} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/merge-assist.db");

        let store = Store::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();
        let names: Vec<_> = tables.into_iter().map(|t| t.0).collect();
        assert_eq!(
            names,
            vec!["_migrations", "batch_operations", "merge_history", "merge_requests"]
        );
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("merge-assist.db");

        drop(Store::open(&db_path).await.unwrap());
        let store = Store::open(&db_path).await.unwrap();

        let applied: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(applied.0, 1);
    }

    #[test]
    fn test_parse_sql_statements() {
        let sql = "-- header\nCREATE TABLE a (x INTEGER DEFAULT (strftime('%s', 'now'))); -- trailing\n\nCREATE INDEX i ON a (x);\n";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE a"));
        assert!(statements[0].ends_with("'now')))"));
        assert_eq!(statements[1], "CREATE INDEX i ON a (x)");
    }

    #[test]
    fn test_id_conversions() {
        assert_eq!(to_db_id(7).unwrap(), 7);
        assert!(to_db_id(u64::MAX).is_err());
        assert!(from_db_id(-1).is_err());
        let now = Utc::now();
        assert_eq!(
            from_millis(to_millis(now)).unwrap().timestamp_millis(),
            now.timestamp_millis()
        );
    }
}
