//! The durable task queue: priority ordering, the atomic claim primitive, and the
//! status-guarded transitions (`heartbeat`, `complete`, `fail`, `cancel`) that keep
//! terminal states absorbing under concurrent workers.

mod error;
mod status;

use chrono::{DateTime, Utc};
use nola_engine::Segment;
use nola_store::SqliteStore;
use sqlx::Row;

pub use error::QueueError;
pub use status::TaskStatus;

/// A task as persisted in `transcription_tasks`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub file_id: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub timeout_seconds: i64,
    pub progress: f64,
    pub duration: Option<f64>,
    pub segments: Option<Vec<Segment>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields accepted by [`TaskQueue::enqueue`]; `priority` and `max_retries` default to
/// `0` and `3` per spec.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub file_id: String,
    pub priority: i64,
    pub max_retries: i64,
    pub timeout_seconds: i64,
}

impl NewTask {
    pub fn new(id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_id: file_id.into(),
            priority: 0,
            max_retries: 3,
            timeout_seconds: 3600,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// A page of [`TaskRecord`]s ordered by `created_at DESC`, optionally filtered by an
/// exact-match status.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// The durable priority queue built on [`SqliteStore`].
///
/// Every status-changing method issues a single `UPDATE ... WHERE id = ? AND status =
/// ?`-shaped statement and inspects `rows_affected()`, rather than reading the current
/// status and then deciding whether to write — that read-then-write shape is exactly
/// the race a concurrent cancel/heartbeat/complete can land in between.
#[derive(Clone)]
pub struct TaskQueue {
    store: SqliteStore,
}

impl TaskQueue {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Inserts a new `PENDING` task. Fails with [`QueueError::DuplicateId`] if
    /// `task.id` already exists, [`QueueError::UnknownFile`] if `task.file_id` has no
    /// `files` row (enforced by the table's foreign key, per §3 of the supplement in
    /// `SPEC_FULL.md`).
    pub async fn enqueue(&self, task: NewTask) -> Result<(), QueueError> {
        let result = sqlx::query(
            "INSERT INTO transcription_tasks \
             (id, file_id, status, priority, retry_count, max_retries, timeout_seconds, \
              progress, created_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?, 0.0, ?)",
        )
        .bind(&task.id)
        .bind(&task.file_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(task.priority)
        .bind(task.max_retries)
        .bind(task.timeout_seconds)
        .bind(Utc::now().to_rfc3339())
        .execute(self.store.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(QueueError::DuplicateId(task.id))
            }
            Err(sqlx::Error::Database(db_err)) if is_foreign_key_violation(db_err.message()) => {
                Err(QueueError::UnknownFile(task.file_id))
            }
            Err(other) => Err(QueueError::Database(other)),
        }
    }

    /// The central claim primitive: selects the single `PENDING` task with the
    /// highest `priority` (ties broken by the earliest `created_at`), transitions it
    /// to `PROCESSING`, and returns the post-image — all in one `UPDATE ...
    /// RETURNING` statement, so two concurrent callers can never receive the same
    /// task.
    pub async fn dequeue(&self, worker_id: &str) -> Result<Option<TaskRecord>, QueueError> {
        let now = Utc::now().to_rfc3339();

        let row = sqlx::query(
            r#"
            UPDATE transcription_tasks
            SET status = ?, worker_id = ?, started_at = ?, last_heartbeat = ?
            WHERE id = (
                SELECT id FROM transcription_tasks
                WHERE status = ?
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(TaskStatus::Processing.as_str())
        .bind(worker_id)
        .bind(&now)
        .bind(&now)
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(self.store.pool())
        .await?;

        row.map(row_to_task_record).transpose()
    }

    /// Updates `last_heartbeat` and `progress`, but only while the task is still
    /// `PROCESSING`. Returns `true` iff a row was updated — `false` means the task
    /// raced to `CANCELLED`/`COMPLETED`/`FAILED` first and this heartbeat is a no-op.
    pub async fn heartbeat(&self, task_id: &str, progress: f64) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE transcription_tasks SET last_heartbeat = ?, progress = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(progress)
        .bind(task_id)
        .bind(TaskStatus::Processing.as_str())
        .execute(self.store.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transitions `PROCESSING` → `COMPLETED`. Applied only when the current status
    /// is still `PROCESSING`, so a `cancel` that wins the race with a completing
    /// worker leaves the task `CANCELLED` with no segments written.
    pub async fn complete(
        &self,
        task_id: &str,
        segments: &[Segment],
        duration: f64,
    ) -> Result<bool, QueueError> {
        let segments_json = serde_json::to_string(segments)?;

        let result = sqlx::query(
            "UPDATE transcription_tasks \
             SET status = ?, segments = ?, duration = ?, progress = 100.0, completed_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Completed.as_str())
        .bind(segments_json)
        .bind(duration)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(TaskStatus::Processing.as_str())
        .execute(self.store.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Two-phase atomic failure handling. When `should_retry` is `true`, first tries
    /// to requeue to `PENDING` with the retry ceiling (`retry_count < max_retries`)
    /// checked *inside* the `UPDATE` predicate — not by a prior `SELECT` — so two
    /// concurrent failures can't both slip past the ceiling. If that requeue doesn't
    /// apply (either `should_retry` is `false`, or the ceiling guard failed), falls
    /// through to a terminal `FAILED` transition.
    ///
    /// Returns `true` iff the task was permanently failed (the terminal branch
    /// applied), `false` iff it was requeued for retry. A task not in `PROCESSING` at
    /// all (already terminal, or never claimed) leaves both branches as no-ops,
    /// yielding `false`.
    pub async fn fail(
        &self,
        task_id: &str,
        error: &str,
        should_retry: bool,
    ) -> Result<bool, QueueError> {
        if should_retry {
            let requeued = sqlx::query(
                "UPDATE transcription_tasks \
                 SET status = ?, retry_count = retry_count + 1, error = ?, \
                     worker_id = NULL, started_at = NULL \
                 WHERE id = ? AND status = ? AND retry_count < max_retries",
            )
            .bind(TaskStatus::Pending.as_str())
            .bind(error)
            .bind(task_id)
            .bind(TaskStatus::Processing.as_str())
            .execute(self.store.pool())
            .await?;

            if requeued.rows_affected() > 0 {
                return Ok(false);
            }
        }

        let failed = sqlx::query(
            "UPDATE transcription_tasks SET status = ?, error = ?, completed_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(TaskStatus::Processing.as_str())
        .execute(self.store.pool())
        .await?;

        Ok(failed.rows_affected() > 0)
    }

    /// Transitions `PENDING` or `PROCESSING` to `CANCELLED`. No effect on a task
    /// already in a terminal state.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query(
            "UPDATE transcription_tasks SET status = ?, completed_at = ? \
             WHERE id = ? AND status IN (?, ?)",
        )
        .bind(TaskStatus::Cancelled.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Processing.as_str())
        .execute(self.store.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, QueueError> {
        let row = sqlx::query("SELECT * FROM transcription_tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(self.store.pool())
            .await?;

        row.map(row_to_task_record).transpose()
    }

    /// Lists tasks ordered by `created_at DESC`, optionally filtered to an exact
    /// status match.
    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<TaskRecord>, QueueError> {
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM transcription_tasks WHERE status = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(status.as_str())
                .bind(filter.limit)
                .bind(filter.offset)
                .fetch_all(self.store.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM transcription_tasks ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(filter.limit)
                .bind(filter.offset)
                .fetch_all(self.store.pool())
                .await?
            }
        };

        rows.into_iter().map(row_to_task_record).collect()
    }

    pub async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<i64, QueueError> {
        let row = match status {
            Some(status) => {
                sqlx::query("SELECT COUNT(*) AS n FROM transcription_tasks WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(self.store.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM transcription_tasks")
                    .fetch_one(self.store.pool())
                    .await?
            }
        };

        Ok(row.try_get("n")?)
    }
}

fn is_foreign_key_violation(message: &str) -> bool {
    message.to_ascii_lowercase().contains("foreign key constraint failed")
}

fn row_to_task_record(row: sqlx::sqlite::SqliteRow) -> Result<TaskRecord, QueueError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse()
        .map_err(|e: String| QueueError::Database(sqlx::Error::Decode(e.into())))?;

    let started_at: Option<String> = row.try_get("started_at")?;
    let last_heartbeat: Option<String> = row.try_get("last_heartbeat")?;
    let created_at: String = row.try_get("created_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let segments: Option<String> = row.try_get("segments")?;

    Ok(TaskRecord {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        status,
        priority: row.try_get("priority")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        worker_id: row.try_get("worker_id")?,
        started_at: parse_timestamp(started_at)?,
        last_heartbeat: parse_timestamp(last_heartbeat)?,
        timeout_seconds: row.try_get("timeout_seconds")?,
        progress: row.try_get("progress")?,
        duration: row.try_get("duration")?,
        segments: segments
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        error: row.try_get("error")?,
        created_at: parse_timestamp(Some(created_at))?.expect("created_at is NOT NULL"),
        completed_at: parse_timestamp(completed_at)?,
    })
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>, QueueError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| QueueError::Database(sqlx::Error::Decode(e.into())))
        })
        .transpose()
}
