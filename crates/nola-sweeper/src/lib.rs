//! Periodic maintenance: reclaiming tasks abandoned by crashed or stuck workers.
//!
//! Each pass here is a two-phase atomic pair — requeue under the retry ceiling, fail
//! at it — so a task that keeps timing out terminates in `FAILED` instead of
//! oscillating in `PENDING` forever (the "poison pill" scenario).

mod error;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use nola_store::SqliteStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use error::SweeperError;

/// How many rows each phase of a sweep touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Rows requeued to `PENDING` (still under the retry ceiling).
    pub requeued: u64,
    /// Rows transitioned straight to `FAILED` (at or past the retry ceiling).
    pub failed: u64,
}

impl SweepOutcome {
    pub fn total(self) -> u64 {
        self.requeued + self.failed
    }
}

/// Configuration for a recurring [`Sweeper::spawn`] loop.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub sweep_interval_secs: u64,
    pub task_timeout_secs: i64,
    pub heartbeat_timeout_secs: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            task_timeout_secs: 3600,
            heartbeat_timeout_secs: 300,
        }
    }
}

/// Reclaims processing tasks abandoned by crashed or wedged workers.
#[derive(Clone)]
pub struct Sweeper {
    store: SqliteStore,
}

impl Sweeper {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Reclaims `PROCESSING` tasks whose `started_at` is older than
    /// `timeout_seconds`: requeues those still under the retry ceiling, and
    /// terminally fails those at it.
    pub async fn requeue_timeout_tasks(
        &self,
        timeout_seconds: i64,
    ) -> Result<SweepOutcome, SweeperError> {
        let threshold = timeout_threshold(timeout_seconds);

        let requeued = sqlx::query(
            "UPDATE transcription_tasks \
             SET status = 'pending', worker_id = NULL, started_at = NULL, \
                 retry_count = retry_count + 1, error = 'Task timeout - requeued' \
             WHERE status = 'processing' AND started_at < ? AND retry_count < max_retries",
        )
        .bind(&threshold)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        let failed = sqlx::query(
            "UPDATE transcription_tasks \
             SET status = 'failed', completed_at = ?, \
                 error = 'Task timeout - max retries exceeded' \
             WHERE status = 'processing' AND started_at < ? AND retry_count >= max_retries",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&threshold)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        Ok(SweepOutcome { requeued, failed })
    }

    /// Same shape as [`Self::requeue_timeout_tasks`], gated on `last_heartbeat`
    /// instead of `started_at` — this covers workers that are alive enough to hold a
    /// claim but not to report progress (wedged in blocking engine I/O).
    pub async fn requeue_dead_workers(
        &self,
        heartbeat_timeout_seconds: i64,
    ) -> Result<SweepOutcome, SweeperError> {
        let threshold = timeout_threshold(heartbeat_timeout_seconds);

        let requeued = sqlx::query(
            "UPDATE transcription_tasks \
             SET status = 'pending', worker_id = NULL, started_at = NULL, \
                 retry_count = retry_count + 1, error = 'Worker heartbeat timeout - requeued' \
             WHERE status = 'processing' AND last_heartbeat < ? AND retry_count < max_retries",
        )
        .bind(&threshold)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        let failed = sqlx::query(
            "UPDATE transcription_tasks \
             SET status = 'failed', completed_at = ?, \
                 error = 'Worker heartbeat timeout - max retries exceeded' \
             WHERE status = 'processing' AND last_heartbeat < ? AND retry_count >= max_retries",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&threshold)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        Ok(SweepOutcome { requeued, failed })
    }

    /// Runs both maintenance passes once.
    pub async fn sweep_once(&self, config: &SweeperConfig) -> Result<(), SweeperError> {
        let timeouts = self.requeue_timeout_tasks(config.task_timeout_secs).await?;
        if timeouts.total() > 0 {
            info!(
                requeued = timeouts.requeued,
                failed = timeouts.failed,
                "swept timed-out tasks"
            );
        }

        let dead_workers = self
            .requeue_dead_workers(config.heartbeat_timeout_secs)
            .await?;
        if dead_workers.total() > 0 {
            info!(
                requeued = dead_workers.requeued,
                failed = dead_workers.failed,
                "swept tasks with stale heartbeats"
            );
        }

        Ok(())
    }

    /// Spawns a dedicated background task that sweeps on `config.sweep_interval_secs`
    /// until the returned handle is aborted or dropped along with its runtime. A
    /// sweep failure is logged and does not stop the loop — the same "one bad
    /// iteration never kills the supervisor" posture the worker loop takes.
    pub fn spawn(self, config: SweeperConfig) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once(&config).await {
                    warn!("sweep failed: {e}");
                }
            }
        })
    }
}

fn timeout_threshold(seconds: i64) -> String {
    (Utc::now() - ChronoDuration::seconds(seconds)).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nola_files::{FileRegistry, NewFile};
    use nola_queue::{NewTask, TaskQueue, TaskStatus};
    use nola_store::StoreConfig;

    async fn setup() -> (Sweeper, TaskQueue, FileRegistry) {
        let store = SqliteStore::connect(StoreConfig::in_memory()).await.unwrap();
        let sweeper = Sweeper::new(store.clone());
        let queue = TaskQueue::new(store.clone());
        let files = FileRegistry::new(store);
        (sweeper, queue, files)
    }

    async fn seed(files: &FileRegistry, queue: &TaskQueue, id: &str, max_retries: i64) {
        files
            .create_file(NewFile {
                id: id.to_string(),
                filename: "clip.wav".to_string(),
                path: format!("/data/{id}.wav"),
                size: 1,
                content_type: "audio/wav".to_string(),
            })
            .await
            .unwrap();
        queue
            .enqueue(NewTask::new(id, id).with_max_retries(max_retries))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn requeue_timeout_tasks_requeues_under_ceiling() {
        let (sweeper, queue, files) = setup().await;
        seed(&files, &queue, "t1", 3).await;
        queue.dequeue("w").await.unwrap();

        let outcome = sweeper.requeue_timeout_tasks(0).await.unwrap();
        assert_eq!(outcome.requeued, 1);
        assert_eq!(outcome.failed, 0);

        let task = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn poison_pill_terminates_in_failed_not_pending_forever() {
        let (sweeper, queue, files) = setup().await;
        seed(&files, &queue, "t1", 2).await;

        for _ in 0..3 {
            queue.dequeue("w").await.unwrap();
            sweeper.requeue_timeout_tasks(0).await.unwrap();
        }

        let task = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
        assert!(task.error.unwrap().contains("max retries exceeded"));
    }

    #[tokio::test]
    async fn requeue_dead_workers_is_gated_on_heartbeat_not_started_at() {
        let (sweeper, queue, files) = setup().await;
        seed(&files, &queue, "t1", 3).await;
        queue.dequeue("w").await.unwrap();

        let outcome = sweeper.requeue_dead_workers(0).await.unwrap();
        assert_eq!(outcome.requeued, 1);

        let task = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn a_fresh_claim_is_not_swept() {
        let (sweeper, queue, files) = setup().await;
        seed(&files, &queue, "t1", 3).await;
        queue.dequeue("w").await.unwrap();

        let outcome = sweeper.requeue_timeout_tasks(3600).await.unwrap();
        assert_eq!(outcome.total(), 0);

        let task = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
    }
}
