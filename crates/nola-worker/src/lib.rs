//! The worker runtime: a poll loop that claims tasks, drives a pluggable [`Engine`],
//! streams heartbeats, and honors cooperative mid-flight cancellation.
//!
//! The engine's `transcribe` call is synchronous and may block for minutes (per
//! `nola-engine`'s contract), so it runs on a dedicated `std::thread` and forwards
//! progress/segments to the async poll loop over a bounded channel — the
//! parallel-threads bridge this workspace's design notes call out as equivalent to a
//! purely sequential pull-model implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gethostname::gethostname;
use nola_engine::{Engine, EngineError, Segment, TranscribeOptions};
use nola_files::FileRegistry;
use nola_queue::{QueueError, TaskQueue, TaskRecord, TaskStatus};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Tunables for [`Worker::run`]. Mirrors the environment configuration in the
/// external interface contract: poll interval and, indirectly, task/heartbeat
/// timeouts (owned by `nola-sweeper`, not duplicated here).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub loop_error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            loop_error_backoff: Duration::from_secs(5),
        }
    }
}

/// Builds this process's worker identity: `{host}-{pid}`, unique among concurrently
/// live workers without requiring coordination. A worker binary is single-threaded
/// per the concurrency model, so the process id alone disambiguates workers sharing a
/// host.
pub fn worker_identity() -> String {
    format!(
        "{}-{}",
        gethostname().to_string_lossy(),
        std::process::id()
    )
}

enum EngineEvent {
    Progress(f32),
    Segment(Segment),
    SegmentFailed(EngineError),
    TranscribeFailed(EngineError),
}

/// Runs `engine.transcribe` on a dedicated thread, forwarding progress and segments
/// back to the caller over `tx`. Exits as soon as `transcribe` fails, the segment
/// sequence is exhausted, or the receiving end is dropped (the async side observed
/// cancellation and stopped reading).
fn spawn_engine_thread<E: Engine + 'static>(
    engine: Arc<E>,
    file_path: String,
    options: TranscribeOptions,
    tx: mpsc::Sender<EngineEvent>,
) {
    std::thread::spawn(move || {
        let progress_tx = tx.clone();
        let mut on_progress = move |p: f32| {
            let _ = progress_tx.blocking_send(EngineEvent::Progress(p));
        };

        match engine.transcribe(&file_path, &options, &mut on_progress) {
            Ok(segments) => {
                for item in segments {
                    let event = match item {
                        Ok(segment) => EngineEvent::Segment(segment),
                        Err(e) => EngineEvent::SegmentFailed(e),
                    };
                    let stop = matches!(event, EngineEvent::SegmentFailed(_));
                    if tx.blocking_send(event).is_err() || stop {
                        break;
                    }
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(EngineEvent::TranscribeFailed(e));
            }
        }
    });
}

/// The result of one `process_task` invocation, surfaced mainly for tests — the
/// worker loop itself only logs these.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { segments: usize, duration: f64 },
    CompletionRaced,
    Cancelled,
    FailedPermanently(String),
    Retrying(String),
}

/// The single-threaded claim/drive/report loop described in this workspace's worker
/// component.
pub struct Worker<E: Engine> {
    queue: TaskQueue,
    files: FileRegistry,
    engine: Arc<E>,
    worker_id: String,
    config: WorkerConfig,
}

impl<E: Engine + 'static> Worker<E> {
    pub fn new(queue: TaskQueue, files: FileRegistry, engine: E, config: WorkerConfig) -> Self {
        Self {
            queue,
            files,
            engine: Arc::new(engine),
            worker_id: worker_identity(),
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Runs the poll loop until `shutdown` is observed between tasks. A task already
    /// mid-flight always runs to completion or observes cancellation on its own; the
    /// shutdown flag is only checked at the IDLE boundary.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(worker_id = %self.worker_id, "worker started");

        while !shutdown.load(Ordering::Relaxed) {
            match self.queue.dequeue(&self.worker_id).await {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                }
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "worker loop error; backing off");
                    tokio::time::sleep(self.config.loop_error_backoff).await;
                }
            }
        }

        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Drives one claimed task from preflight through terminal reporting. Never
    /// propagates an error out: every failure path resolves to a queue write (or, for
    /// transient heartbeat hiccups, a swallowed-and-logged no-op) so one bad task
    /// never stops the loop.
    pub async fn process_task(&self, task: TaskRecord) -> TaskOutcome {
        let task_id = task.id.clone();
        info!(task_id = %task_id, file_id = %task.file_id, "starting transcription");

        let file = match self.files.get_file(&task.file_id).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                let message = format!("file not found: {}", task.file_id);
                return self.fail_permanently(&task_id, message).await;
            }
            Err(e) => {
                let message = format!("file lookup failed: {e}");
                return self.fail_permanently(&task_id, message).await;
            }
        };

        if !std::path::Path::new(&file.path).exists() {
            let message = format!("file does not exist on disk: {}", file.path);
            return self.fail_permanently(&task_id, message).await;
        }

        let (tx, mut rx) = mpsc::channel(8);
        spawn_engine_thread(
            Arc::clone(&self.engine),
            file.path.clone(),
            TranscribeOptions::default(),
            tx,
        );

        let mut segments: Vec<Segment> = Vec::new();
        let mut duration = 0.0_f64;
        let mut progress: f32 = 0.0;
        let mut engine_error: Option<EngineError> = None;
        let mut cancelled = false;

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Progress(p) => progress = p,
                EngineEvent::Segment(segment) => {
                    duration = duration.max(segment.end);
                    segments.push(segment);

                    if self.observed_cancellation(&task_id).await {
                        cancelled = true;
                        break;
                    }

                    self.heartbeat(&task_id, progress as f64).await;
                }
                EngineEvent::SegmentFailed(e) => {
                    engine_error = Some(e);
                    break;
                }
                EngineEvent::TranscribeFailed(e) => {
                    engine_error = Some(e);
                    break;
                }
            }
        }

        if cancelled {
            info!(task_id = %task_id, "task cancelled mid-transcription; discarding partial results");
            return TaskOutcome::Cancelled;
        }

        if let Some(err) = engine_error {
            let message = err.to_string();
            warn!(task_id = %task_id, error = %message, "engine error; scheduling retry");
            if let Err(e) = self.queue.fail(&task_id, &message, true).await {
                error!(task_id = %task_id, error = %e, "failed to record engine failure");
            }
            return TaskOutcome::Retrying(message);
        }

        if segments.is_empty() {
            warn!(task_id = %task_id, "no segments produced; file may be silent or fully VAD-filtered");
        }

        match self.queue.complete(&task_id, &segments, duration).await {
            Ok(true) => {
                info!(
                    task_id = %task_id,
                    segments = segments.len(),
                    duration,
                    "task completed"
                );
                TaskOutcome::Completed {
                    segments: segments.len(),
                    duration,
                }
            }
            Ok(false) => {
                warn!(task_id = %task_id, "task raced to a terminal state before completion could be recorded");
                TaskOutcome::CompletionRaced
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "failed to record completion");
                TaskOutcome::CompletionRaced
            }
        }
    }

    async fn observed_cancellation(&self, task_id: &str) -> bool {
        match self.queue.get_task(task_id).await {
            Ok(Some(current)) => current.status == TaskStatus::Cancelled,
            Ok(None) => false,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "cancellation check failed; continuing");
                false
            }
        }
    }

    /// Heartbeats are best-effort: a transient `Store` hiccup here must never kill
    /// the worker. The sweeper reclaims the task if the heartbeat silence persists.
    async fn heartbeat(&self, task_id: &str, progress: f64) {
        match self.queue.heartbeat(task_id, progress).await {
            Ok(_) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "heartbeat failed; continuing"),
        }
    }

    async fn fail_permanently(&self, task_id: &str, message: String) -> TaskOutcome {
        warn!(task_id = %task_id, message = %message, "permanent failure");
        if let Err(e) = self.queue.fail(task_id, &message, false).await {
            error!(task_id = %task_id, error = %e, "failed to record permanent failure");
        }
        TaskOutcome::FailedPermanently(message)
    }
}

/// Thin wrapper so callers handling `QueueError` from outside this crate don't need
/// to depend on `nola-queue` directly for the error type name.
pub type WorkerQueueError = QueueError;

#[cfg(test)]
mod tests {
    use super::*;
    use nola_engine::SilenceEngine;
    use nola_files::NewFile;
    use nola_queue::NewTask;
    use nola_store::{SqliteStore, StoreConfig};
    use std::io::Write;

    async fn setup() -> (Worker<SilenceEngine>, FileRegistry, TaskQueue) {
        let store = SqliteStore::connect(StoreConfig::in_memory()).await.unwrap();
        let queue = TaskQueue::new(store.clone());
        let files = FileRegistry::new(store);
        let worker = Worker::new(
            queue.clone(),
            files.clone(),
            SilenceEngine,
            WorkerConfig::default(),
        );
        (worker, files, queue)
    }

    #[tokio::test]
    async fn missing_file_record_fails_permanently_without_retry() {
        let (worker, files, queue) = setup().await;
        files
            .create_file(NewFile {
                id: "f1".to_string(),
                filename: "clip.wav".to_string(),
                path: "/tmp/clip.wav".to_string(),
                size: 1,
                content_type: "audio/wav".to_string(),
            })
            .await
            .unwrap();
        queue.enqueue(NewTask::new("t1", "f1")).await.unwrap();
        let task = queue.dequeue(worker.worker_id()).await.unwrap().unwrap();

        // The file record is deleted after enqueue but before the worker claims
        // and processes the task — simulating a file cleaned up mid-flight.
        files.delete_file("f1").await.unwrap();

        let outcome = worker.process_task(task).await;
        assert!(matches!(outcome, TaskOutcome::FailedPermanently(_)));

        let record = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn missing_file_on_disk_fails_permanently() {
        let (worker, files, queue) = setup().await;
        files
            .create_file(NewFile {
                id: "f1".to_string(),
                filename: "clip.wav".to_string(),
                path: "/nonexistent/path/clip.wav".to_string(),
                size: 1,
                content_type: "audio/wav".to_string(),
            })
            .await
            .unwrap();
        queue.enqueue(NewTask::new("t1", "f1")).await.unwrap();
        let task = queue.dequeue(worker.worker_id()).await.unwrap().unwrap();

        let outcome = worker.process_task(task).await;
        assert!(matches!(outcome, TaskOutcome::FailedPermanently(_)));

        let record = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn empty_transcription_completes_successfully() {
        let (worker, files, queue) = setup().await;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"not really audio").unwrap();

        files
            .create_file(NewFile {
                id: "f1".to_string(),
                filename: "clip.wav".to_string(),
                path: tmp.path().to_string_lossy().to_string(),
                size: 1,
                content_type: "audio/wav".to_string(),
            })
            .await
            .unwrap();
        queue.enqueue(NewTask::new("t1", "f1")).await.unwrap();
        let task = queue.dequeue(worker.worker_id()).await.unwrap().unwrap();

        let outcome = worker.process_task(task).await;
        assert_eq!(
            outcome,
            TaskOutcome::Completed {
                segments: 0,
                duration: 0.0
            }
        );

        let record = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.segments, Some(Vec::new()));
        assert_eq!(record.duration, Some(0.0));
        assert_eq!(record.progress, 100.0);
    }

    #[tokio::test]
    async fn cancellation_before_claim_is_observed_instead_of_completion() {
        let (worker, files, queue) = setup().await;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"not really audio").unwrap();

        files
            .create_file(NewFile {
                id: "f1".to_string(),
                filename: "clip.wav".to_string(),
                path: tmp.path().to_string_lossy().to_string(),
                size: 1,
                content_type: "audio/wav".to_string(),
            })
            .await
            .unwrap();
        queue.enqueue(NewTask::new("t1", "f1")).await.unwrap();
        let task = queue.dequeue(worker.worker_id()).await.unwrap().unwrap();
        queue.cancel("t1").await.unwrap();

        // SilenceEngine yields no segments, so cancellation can't be observed at a
        // segment boundary here; `complete` itself is the guard that must reject it.
        let outcome = worker.process_task(task).await;
        assert_eq!(outcome, TaskOutcome::CompletionRaced);

        let record = queue.get_task("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
    }
}
