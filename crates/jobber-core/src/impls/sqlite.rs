//! SQLite task store (relational style).
//!
//! Two tables mirror the two partitions: `jobber_tasks` (free) and
//! `jobber_failed_tasks`. Timestamps are INTEGER milliseconds since the epoch,
//! and `args` is the JSON text of the argument list.
//!
//! The dispatch claim is a single conditional `UPDATE ... WHERE is_locked = 0`,
//! so concurrent schedulers on the same database race safely: exactly one
//! statement affects the row.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{info, warn};

use crate::domain::{
    Algo, Arg, Queue, StoreError, TaskHash, TaskOptions, TaskRecord, TaskType, ensure_storable,
};
use crate::ports::{Clock, DigestHashGenerator, HashGenerator, SystemClock, TaskStore};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobber_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        queue TEXT NOT NULL,
        hash TEXT NOT NULL UNIQUE,
        payload TEXT NOT NULL,
        args TEXT NOT NULL,
        is_locked INTEGER NOT NULL DEFAULT 0,
        is_failed INTEGER NOT NULL DEFAULT 0,
        max_retry INTEGER NOT NULL,
        trial INTEGER NOT NULL DEFAULT 0,
        timeout INTEGER NOT NULL,
        delay INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobber_tasks_queue ON jobber_tasks (queue, is_locked)",
    r#"
    CREATE TABLE IF NOT EXISTS jobber_failed_tasks (
        id INTEGER PRIMARY KEY,
        queue TEXT NOT NULL,
        hash TEXT NOT NULL UNIQUE,
        payload TEXT NOT NULL,
        args TEXT NOT NULL,
        is_locked INTEGER NOT NULL DEFAULT 0,
        is_failed INTEGER NOT NULL DEFAULT 1,
        max_retry INTEGER NOT NULL,
        trial INTEGER NOT NULL DEFAULT 0,
        timeout INTEGER NOT NULL,
        delay INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        modified_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobber_failed_tasks_queue ON jobber_failed_tasks (queue)",
];

const COLUMNS: &str = "id, queue, hash, payload, args, is_locked, is_failed, max_retry, trial, timeout, delay, created_at, modified_at";

fn order_by(algo: Algo) -> &'static str {
    match algo {
        Algo::Fifo => "ORDER BY created_at ASC, id ASC",
        Algo::Sjf => "ORDER BY timeout ASC, created_at ASC, id ASC",
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp {ms} out of range")))
}

fn record_from_row(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let args: String = row.try_get("args")?;
    let args: Vec<Arg> = serde_json::from_str(&args)?;

    Ok(TaskRecord {
        queue: row.try_get("queue")?,
        hash: TaskHash::new(row.try_get::<String, _>("hash")?),
        payload: TaskType::new(row.try_get::<String, _>("payload")?),
        args,
        is_locked: row.try_get("is_locked")?,
        is_failed: row.try_get("is_failed")?,
        max_retry: row.try_get::<i64, _>("max_retry")? as u32,
        trial: row.try_get::<i64, _>("trial")? as u32,
        timeout: row.try_get::<i64, _>("timeout")? as u64,
        delay: row.try_get::<i64, _>("delay")? as u64,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        modified_at: millis_to_datetime(row.try_get("modified_at")?)?,
    })
}

pub struct SqliteTaskStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    hasher: DigestHashGenerator<Arc<dyn Clock>>,
}

impl SqliteTaskStore {
    /// Connect and create the schema. `url` is any sqlx SQLite URL, e.g.
    /// `sqlite:jobber.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_clock(url, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Configuration(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // Each connection to `:memory:` is its own database.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self::from_pool(pool, clock).await?;
        info!(url = %url, "connected to SQLite task store");
        Ok(store)
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self {
            pool,
            hasher: DigestHashGenerator::new(Arc::clone(&clock)),
            clock,
        })
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn select(
        &self,
        table: &str,
        queue: &Queue,
        condition: &str,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {table} WHERE queue = ? {condition} {}",
            order_by(queue.algo)
        );
        let rows = sqlx::query(&sql)
            .bind(&queue.name)
            .fetch_all(&self.pool)
            .await?;

        // one unreadable row must not hide the rest of the queue
        let records = rows
            .iter()
            .filter_map(|row| match record_from_row(row) {
                Ok(record) => Some(record),
                Err(err) => {
                    let hash = row.try_get::<String, _>("hash").unwrap_or_default();
                    warn!(table, queue = %queue.name, hash = %hash, error = %err, "skipping unreadable row");
                    None
                }
            })
            .collect();
        Ok(records)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn stash(
        &self,
        queue: &str,
        payload: &TaskType,
        args: &[Arg],
        options: TaskOptions,
    ) -> Result<TaskRecord, StoreError> {
        ensure_storable(args).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let queue = queue.trim();
        let hash = self.hasher.generate(queue, payload);
        // stored at millisecond precision; the returned record must match a reload
        let now = millis_to_datetime(self.now_millis())?;
        let record = TaskRecord::new(queue, hash, payload.clone(), args.to_vec(), options, now);
        let created_at = record.created_at.timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO jobber_tasks
                (queue, hash, payload, args, is_locked, is_failed, max_retry, trial, timeout, delay, created_at, modified_at)
            VALUES (?, ?, ?, ?, 0, 0, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.queue)
        .bind(record.hash.as_str())
        .bind(record.payload.as_str())
        .bind(serde_json::to_string(&record.args)?)
        .bind(record.max_retry as i64)
        .bind(record.timeout as i64)
        .bind(record.delay as i64)
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn lock(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobber_tasks SET is_locked = 1, modified_at = ? WHERE hash = ? AND is_locked = 0",
        )
        .bind(self.now_millis())
        .bind(hash.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_trial(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobber_tasks SET trial = trial + 1, is_locked = 1, modified_at = ? WHERE hash = ? AND is_locked = 0",
        )
        .bind(self.now_millis())
        .bind(hash.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, hash: &TaskHash) -> Result<TaskRecord, StoreError> {
        let sql = format!(
            "UPDATE jobber_tasks SET is_locked = 0, modified_at = ? WHERE hash = ? RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(self.now_millis())
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(StoreError::NotFound(hash.clone())),
        }
    }

    async fn fail(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobber_failed_tasks
                (id, queue, hash, payload, args, is_locked, is_failed, max_retry, trial, timeout, delay, created_at, modified_at)
            SELECT id, queue, hash, payload, args, 0, 1, max_retry, trial, timeout, delay, created_at, ?
            FROM jobber_tasks WHERE hash = ?
            "#,
        )
        .bind(self.now_millis())
        .bind(hash.as_str())
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM jobber_tasks WHERE hash = ?")
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn purge(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jobber_tasks WHERE hash = ?")
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM jobber_failed_tasks WHERE hash = ?")
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn restore_one_failed(&self, hash: &TaskHash) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobber_tasks
                (id, queue, hash, payload, args, is_locked, is_failed, max_retry, trial, timeout, delay, created_at, modified_at)
            SELECT id, queue, hash, payload, args, 0, 0, max_retry, 0, timeout, delay, created_at, ?
            FROM jobber_failed_tasks WHERE hash = ?
            "#,
        )
        .bind(self.now_millis())
        .bind(hash.as_str())
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM jobber_failed_tasks WHERE hash = ?")
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn restore_failed(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobber_tasks
                (id, queue, hash, payload, args, is_locked, is_failed, max_retry, trial, timeout, delay, created_at, modified_at)
            SELECT id, queue, hash, payload, args, 0, 0, max_retry, 0, timeout, delay, created_at, ?
            FROM jobber_failed_tasks
            "#,
        )
        .bind(self.now_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jobber_failed_tasks")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(moved.rows_affected())
    }

    async fn delay(&self, hash: &TaskHash, period: Duration) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobber_tasks SET delay = ?, modified_at = ? WHERE hash = ? AND is_locked = 0",
        )
        .bind(period.as_millis() as i64)
        .bind(self.now_millis())
        .bind(hash.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobber_tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn fetch_free(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        let now = self.clock.now();
        let records = self
            .select("jobber_tasks", queue, "AND is_locked = 0")
            .await?;
        Ok(records.into_iter().filter(|r| r.is_eligible(now)).collect())
    }

    async fn fetch_failed(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        self.select("jobber_failed_tasks", queue, "").await
    }

    async fn fetch_one(&self, hash: &TaskHash) -> Result<Option<TaskRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM jobber_tasks WHERE hash = ?");
        let row = sqlx::query(&sql)
            .bind(hash.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn fetch_locked(&self, queue: &Queue) -> Result<Vec<TaskRecord>, StoreError> {
        self.select("jobber_tasks", queue, "AND is_locked = 1").await
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
