// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for task records.
//!
//! One implementation serves both stores: SQLite for the embedded primary,
//! MySQL (or another SQLite file) for the durable secondary.
//!
//! Schema:
//! ```sql
//! CREATE TABLE tasks (
//!   id          BIGINT PRIMARY KEY AUTO_INCREMENT, -- store-local identity
//!   title       VARCHAR(100) NOT NULL,
//!   description TEXT,
//!   status      VARCHAR(16) NOT NULL,
//!   priority    VARCHAR(16) NOT NULL,
//!   created_at  BIGINT NOT NULL,                   -- epoch millis, never updated
//!   updated_at  BIGINT,
//!   due_at      BIGINT,
//!   assignee    VARCHAR(50),
//!   reporter    VARCHAR(50)
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL TEXT columns come back as BLOB through the `Any` driver, so text
//! columns are read as `String` first and as `Vec<u8>` second.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::traits::{StorageError, TaskStore};
use crate::resilience::retry::{retry, RetryConfig};
use crate::task::{TaskPriority, TaskRecord, TaskStatus};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Ids per `DELETE ... IN (...)` statement. MySQL caps a prepared
/// statement at 65,535 placeholders.
pub(crate) const DELETE_CHUNK_SIZE: usize = 500;

const SELECT_COLUMNS: &str =
    "id, title, description, status, priority, created_at, updated_at, due_at, assignee, reporter";

/// Pool settings for a [`SqlTaskStore`].
#[derive(Debug, Clone)]
pub struct SqlStoreOptions {
    pub max_connections: u32,
    /// How long a call may wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for SqlStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SqlTaskStore {
    name: String,
    pool: AnyPool,
    is_sqlite: bool,
    schema_ready: AtomicBool,
}

impl SqlTaskStore {
    /// Connect eagerly with startup-mode retry and create the schema.
    ///
    /// Use this for a store that must be reachable when the process starts.
    pub async fn connect(
        name: impl Into<String>,
        connection_string: &str,
        options: &SqlStoreOptions,
    ) -> Result<Self, StorageError> {
        install_drivers();
        let name = name.into();

        let pool = retry(&format!("{}_connect", name), &RetryConfig::startup(), || async move {
            AnyPoolOptions::new()
                .max_connections(options.max_connections)
                .acquire_timeout(options.acquire_timeout)
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(classify)
        })
        .await?;

        let store = Self::from_pool(name, pool, connection_string.starts_with("sqlite:"));
        store.ensure_schema().await?;
        info!(store = %store.name, "SQL task store connected");
        Ok(store)
    }

    /// Build a pool without touching the database.
    ///
    /// Connections are opened on first use and the schema is created by the
    /// first call that gets through, so a store that is down at startup can
    /// come up later.
    pub fn connect_lazy(
        name: impl Into<String>,
        connection_string: &str,
        options: &SqlStoreOptions,
    ) -> Result<Self, StorageError> {
        install_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(Duration::from_secs(300))
            .connect_lazy(connection_string)
            .map_err(classify)?;

        Ok(Self::from_pool(name, pool, connection_string.starts_with("sqlite:")))
    }

    fn from_pool(name: impl Into<String>, pool: AnyPool, is_sqlite: bool) -> Self {
        Self {
            name: name.into(),
            pool,
            is_sqlite,
            schema_ready: AtomicBool::new(false),
        }
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// Close the pool; later calls fail as unavailable.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        if self.is_sqlite {
            // WAL journal: readers don't block the writer
            sqlx::query("PRAGMA journal_mode = WAL")
                .execute(&self.pool)
                .await
                .map_err(classify)?;
        }

        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER,
                due_at INTEGER,
                assignee TEXT,
                reporter TEXT
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                title VARCHAR(100) NOT NULL,
                description TEXT,
                status VARCHAR(16) NOT NULL,
                priority VARCHAR(16) NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NULL,
                due_at BIGINT NULL,
                assignee VARCHAR(50),
                reporter VARCHAR(50),
                INDEX idx_created_at (created_at)
            )
            "#
        };

        sqlx::query(sql).execute(&self.pool).await.map_err(classify)?;
        self.schema_ready.store(true, Ordering::Release);
        debug!(store = %self.name, "Task schema ready");
        Ok(())
    }

    async fn insert(&self, record: &TaskRecord) -> Result<TaskRecord, StorageError> {
        let result = sqlx::query(
            "INSERT INTO tasks (title, description, status, priority, created_at, updated_at, due_at, assignee, reporter) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.title)
        .bind(&record.description)
        .bind(record.status.as_str())
        .bind(record.priority.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.due_at)
        .bind(&record.assignee)
        .bind(&record.reporter)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        let id = result.last_insert_id().ok_or_else(|| {
            StorageError::Unavailable(format!("{} did not report an insert id", self.name))
        })?;

        let mut stored = record.clone();
        stored.id = Some(id);
        Ok(stored)
    }

    /// Upsert keyed by an explicit id. `created_at` of an existing row is kept.
    async fn upsert(&self, id: i64, record: &TaskRecord) -> Result<TaskRecord, StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO tasks (id, title, description, status, priority, created_at, updated_at, due_at, assignee, reporter) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                title = excluded.title, \
                description = excluded.description, \
                status = excluded.status, \
                priority = excluded.priority, \
                updated_at = excluded.updated_at, \
                due_at = excluded.due_at, \
                assignee = excluded.assignee, \
                reporter = excluded.reporter"
        } else {
            "INSERT INTO tasks (id, title, description, status, priority, created_at, updated_at, due_at, assignee, reporter) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE \
                title = VALUES(title), \
                description = VALUES(description), \
                status = VALUES(status), \
                priority = VALUES(priority), \
                updated_at = VALUES(updated_at), \
                due_at = VALUES(due_at), \
                assignee = VALUES(assignee), \
                reporter = VALUES(reporter)"
        };

        sqlx::query(sql)
            .bind(id)
            .bind(&record.title)
            .bind(&record.description)
            .bind(record.status.as_str())
            .bind(record.priority.as_str())
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.due_at)
            .bind(&record.assignee)
            .bind(&record.reporter)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        // Re-read so the caller sees the preserved created_at
        self.find_by_id(id).await?.ok_or_else(|| StorageError::Corruption {
            id,
            reason: "row missing right after upsert".into(),
        })
    }
}

#[async_trait]
impl TaskStore for SqlTaskStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, record: &TaskRecord) -> Result<TaskRecord, StorageError> {
        self.ensure_schema().await?;
        match record.id {
            None => self.insert(record).await,
            Some(id) => self.upsert(id, record).await,
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<TaskRecord>, StorageError> {
        self.ensure_schema().await?;
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.map(|r| decode_row(&r)).transpose()
    }

    async fn find_all(&self) -> Result<Vec<TaskRecord>, StorageError> {
        self.ensure_schema().await?;
        let sql = format!("SELECT {} FROM tasks ORDER BY id", SELECT_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter().map(decode_row).collect()
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, StorageError> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        Ok(row.is_some())
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.ensure_schema().await?;
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        let count: i64 = row.try_get("cnt").map_err(classify)?;
        Ok(count as u64)
    }

    async fn delete_all(&self) -> Result<u64, StorageError> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM tasks")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    /// Delete several ids, [`DELETE_CHUNK_SIZE`] per statement.
    ///
    /// Chunks are not wrapped in a transaction: on error, earlier chunks
    /// stay deleted.
    async fn delete_many(&self, ids: &[i64]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.ensure_schema().await?;

        let mut removed = 0u64;
        for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
            let placeholders: Vec<&str> = (0..chunk.len()).map(|_| "?").collect();
            let sql = format!("DELETE FROM tasks WHERE id IN ({})", placeholders.join(", "));

            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            let result = query.execute(&self.pool).await.map_err(classify)?;
            removed += result.rows_affected();
        }
        debug!(store = %self.name, requested = ids.len(), removed, "Deleted tasks by id");
        Ok(removed)
    }
}

/// Map a driver error onto the store error taxonomy.
///
/// Constraint violations are logical; every other database-side or
/// transport failure counts as the store being unavailable.
fn classify(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() {
                StorageError::Constraint(db.to_string())
            } else if matches!(db.kind(), sqlx::error::ErrorKind::NotNullViolation) {
                StorageError::Constraint(db.to_string())
            } else {
                StorageError::Unavailable(db.to_string())
            }
        }
        sqlx::Error::PoolTimedOut => StorageError::Unavailable("connection pool timed out".into()),
        sqlx::Error::ColumnDecode { index, source } => StorageError::Corruption {
            id: -1,
            reason: format!("column {}: {}", index, source),
        },
        other => StorageError::Unavailable(other.to_string()),
    }
}

/// Read a text column as String (SQLite) or bytes (MySQL TEXT via Any).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn decode_row(row: &AnyRow) -> Result<TaskRecord, StorageError> {
    let id: i64 = row.try_get("id").map_err(classify)?;
    let corrupt = |reason: &str| StorageError::Corruption {
        id,
        reason: reason.to_string(),
    };

    let title = text_column(row, "title").ok_or_else(|| corrupt("missing title"))?;
    let status = text_column(row, "status")
        .and_then(|s| TaskStatus::parse(&s))
        .ok_or_else(|| corrupt("unknown status"))?;
    let priority = text_column(row, "priority")
        .and_then(|s| TaskPriority::parse(&s))
        .ok_or_else(|| corrupt("unknown priority"))?;
    let created_at: i64 = row.try_get("created_at").map_err(|_| corrupt("missing created_at"))?;

    Ok(TaskRecord {
        id: Some(id),
        title,
        description: text_column(row, "description"),
        status,
        priority,
        created_at,
        updated_at: row
            .try_get::<Option<i64>, _>("updated_at")
            .map_err(|_| corrupt("unreadable updated_at"))?,
        due_at: row
            .try_get::<Option<i64>, _>("due_at")
            .map_err(|_| corrupt("unreadable due_at"))?,
        assignee: text_column(row, "assignee"),
        reporter: text_column(row, "reporter"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_url(dir: &tempfile::TempDir, name: &str) -> String {
        let path: PathBuf = dir.path().join(format!("sql_test_{}.db", name));
        format!("sqlite://{}?mode=rwc", path.display())
    }

    async fn open(dir: &tempfile::TempDir, name: &str) -> SqlTaskStore {
        SqlTaskStore::connect(name, &temp_db_url(dir, name), &SqlStoreOptions::default())
            .await
            .unwrap()
    }

    fn test_task(title: &str) -> TaskRecord {
        TaskRecord::new(title, TaskStatus::InProgress, TaskPriority::High)
            .with_description("details")
            .with_assignee("alice")
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_round_trips_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "insert").await;

        let saved = store.save(&test_task("Implement authentication")).await.unwrap();
        let id = saved.id.expect("store must assign an id");

        let found = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found, saved);
        assert_eq!(found.status, TaskStatus::InProgress);
        assert_eq!(found.priority, TaskPriority::High);
        assert!(found.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "update").await;

        let saved = store.save(&test_task("original")).await.unwrap();
        let mut changed = saved.clone();
        changed.title = "renamed".into();
        changed.created_at += 10_000;
        changed.touch();

        let updated = store.save(&changed).await.unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.created_at, saved.created_at);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exists_delete_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "exists").await;

        let a = store.save(&test_task("a")).await.unwrap();
        let b = store.save(&test_task("b")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.exists_by_id(a.id.unwrap()).await.unwrap());

        store.delete_by_id(a.id.unwrap()).await.unwrap();
        assert!(!store.exists_by_id(a.id.unwrap()).await.unwrap());
        assert!(store.exists_by_id(b.id.unwrap()).await.unwrap());

        // Deleting again is fine
        store.delete_by_id(a.id.unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_all_and_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "all").await;

        for i in 0..5 {
            store.save(&test_task(&format!("t{}", i))).await.unwrap();
        }
        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        assert_eq!(store.delete_all().await.unwrap(), 5);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_many_spans_several_statements() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "chunked").await;

        let total = DELETE_CHUNK_SIZE * 2 + 7;
        let mut ids = Vec::with_capacity(total);
        for i in 0..total {
            ids.push(store.save(&test_task(&format!("t{}", i))).await.unwrap().id.unwrap());
        }
        let keep = ids.pop().unwrap();
        // Ids that were never issued don't count as removed
        ids.extend([keep + 1_000, keep + 1_001]);

        assert_eq!(store.delete_many(&ids).await.unwrap(), (total - 1) as u64);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.exists_by_id(keep).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_timestamp_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "corrupt_ts").await;
        let id = store.save(&test_task("bad stamp")).await.unwrap().id.unwrap();

        sqlx::query("UPDATE tasks SET updated_at = 'yesterday' WHERE id = ?")
            .bind(id)
            .execute(&store.pool())
            .await
            .unwrap();

        let err = store.find_by_id(id).await.unwrap_err();
        assert!(matches!(err, StorageError::Corruption { id: bad, .. } if bad == id));
    }

    #[tokio::test]
    async fn test_delete_many_single_statement() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "many").await;

        let ids: Vec<i64> = {
            let mut ids = vec![];
            for i in 0..4 {
                ids.push(store.save(&test_task(&format!("t{}", i))).await.unwrap().id.unwrap());
            }
            ids
        };

        assert_eq!(store.delete_many(&ids[..3]).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.delete_many(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "autoinc").await;

        let first = store.save(&test_task("first")).await.unwrap();
        store.delete_all().await.unwrap();
        let second = store.save(&test_task("second")).await.unwrap();

        assert!(second.id.unwrap() > first.id.unwrap());
    }

    #[tokio::test]
    async fn test_lazy_store_creates_schema_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlTaskStore::connect_lazy("lazy", &temp_db_url(&dir, "lazy"), &SqlStoreOptions::default())
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        store.save(&test_task("late")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, "closed").await;
        store.close().await;

        let err = store.count().await.unwrap_err();
        assert!(err.is_availability(), "unexpected error kind: {:?}", err);
    }
}
