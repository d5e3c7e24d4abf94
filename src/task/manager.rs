//! Asynchronous scrape task lifecycle.
//!
//! `submit` validates the URL, records a pending task and queues its id.
//! A fixed set of consumer tasks drain the queue: claim the task, run the
//! pipeline, record the outcome.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::store::TaskStore;
use super::task::{Task, TaskError, TaskId, TaskOutcome, TaskSnapshot, TaskStatus};
use crate::limits::MAX_QUEUE_SIZE;
use crate::pipeline::{ScrapeOptions, ScrapePipeline};
use crate::scraper::UrlValidator;

/// What `get_result` can report for a known task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Completed(Value),
    Failed(String),
    InProgress(TaskStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub max_tasks: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub workers: usize,
    pub max_tasks: usize,
    pub queue_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: crate::limits::DEFAULT_WORKERS,
            max_tasks: crate::limits::DEFAULT_MAX_TASKS,
            queue_size: MAX_QUEUE_SIZE,
        }
    }
}

pub struct TaskManager {
    store: Arc<TaskStore>,
    pipeline: Arc<ScrapePipeline>,
    validator: UrlValidator,
    queue: mpsc::Sender<TaskId>,
    receiver: Mutex<Option<mpsc::Receiver<TaskId>>>,
    workers: usize,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    pub fn new(config: ManagerConfig, pipeline: Arc<ScrapePipeline>, validator: UrlValidator) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_size.max(1));
        Self {
            store: Arc::new(TaskStore::new(config.max_tasks)),
            pipeline,
            validator,
            queue,
            receiver: Mutex::new(Some(receiver)),
            workers: config.workers.max(1),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_tasks(&self) -> usize {
        self.store.capacity()
    }

    /// Start the consumer tasks. Calling it again is a no-op.
    pub async fn start(&self) {
        let Some(receiver) = self.receiver.lock().await.take() else {
            return;
        };
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = self.handles.lock().await;
        for index in 0..self.workers {
            let consumer = Consumer {
                index,
                store: self.store.clone(),
                pipeline: self.pipeline.clone(),
            };
            handles.push(tokio::spawn(consumer.run(receiver.clone(), self.cancel.clone())));
        }
        tracing::info!("Task manager started with {} workers", self.workers);
    }

    /// Validate, record and queue a new task.
    ///
    /// Waits for queue room when the queue is full.
    pub async fn submit(&self, url: &str, options: ScrapeOptions) -> Result<TaskId, TaskError> {
        let url = self.validator.validate(url)?;
        let task = Task::new(url, options);
        let id = task.id();

        for evicted in self.store.insert(task).await {
            tracing::debug!("Evicted task {} (capacity {})", evicted, self.store.capacity());
        }
        if self.queue.send(id).await.is_err() {
            // Only after shutdown; the record stays pending.
            tracing::warn!("Task queue closed, task {} will not run", id);
        }

        tracing::info!("Task {} submitted", id);
        Ok(id)
    }

    pub async fn get_status(&self, id: &TaskId) -> Result<TaskSnapshot, TaskError> {
        self.store
            .snapshot(id)
            .await
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    pub async fn get_result(&self, id: &TaskId) -> Result<TaskResult, TaskError> {
        let (status, outcome) = self
            .store
            .outcome(id)
            .await
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Ok(match outcome {
            Some(TaskOutcome::Completed(result)) => TaskResult::Completed(result),
            Some(TaskOutcome::Failed(error)) => TaskResult::Failed(error),
            None => TaskResult::InProgress(status),
        })
    }

    pub async fn stats(&self) -> TaskStats {
        let counts = self.store.counts().await;
        TaskStats {
            total_tasks: counts.total,
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            max_tasks: self.store.capacity(),
            workers: self.workers,
        }
    }

    /// Stop the consumers. Tasks still queued stay pending.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Task manager stopped");
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Consumer {
    index: usize,
    store: Arc<TaskStore>,
    pipeline: Arc<ScrapePipeline>,
}

impl Consumer {
    async fn run(self, queue: Arc<Mutex<mpsc::Receiver<TaskId>>>, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                id = async { queue.lock().await.recv().await } => id,
            };
            let Some(id) = next else { break };

            // Evicted or already claimed.
            let Some(task) = self.store.claim(&id).await else {
                tracing::debug!("Worker {}: skipping task {}", self.index, id);
                continue;
            };

            tracing::info!("Worker {}: processing task {} ({})", self.index, id, task.url());
            let outcome = self.execute(&task).await;
            let failed = matches!(outcome, TaskOutcome::Failed(_));

            if !self.store.finish(&id, outcome).await {
                tracing::debug!("Task {} was evicted before it finished", id);
            } else if failed {
                tracing::warn!("Task {} failed", id);
            } else {
                tracing::info!("Task {} completed", id);
            }
        }
        tracing::debug!("Task worker {} stopped", self.index);
    }

    async fn execute(&self, task: &Task) -> TaskOutcome {
        let run = self.pipeline.run(task.url(), task.options());
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(report)) => match serde_json::to_value(&report) {
                Ok(value) => TaskOutcome::Completed(value),
                Err(e) => {
                    tracing::error!("Task {}: cannot serialize result: {}", task.id(), e);
                    TaskOutcome::Failed("internal error".to_string())
                }
            },
            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
            Err(_) => {
                tracing::error!("Task {}: pipeline panicked", task.id());
                TaskOutcome::Failed("internal error".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ProcessingClient;
    use crate::scraper::{PageScraper, ScrapeError, ScrapingData, ValidationError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;
    use url::Url;

    /// Scraper that blocks until released, then reports the URL's path as title.
    struct GatedScraper {
        gate: Arc<Notify>,
        gated: bool,
    }

    #[async_trait]
    impl PageScraper for GatedScraper {
        async fn scrape(&self, url: &Url) -> Result<ScrapingData, ScrapeError> {
            if self.gated {
                self.gate.notified().await;
            }
            if url.path() == "/fail" {
                return Err(ScrapeError::Status(500));
            }
            Ok(ScrapingData {
                title: url.path().to_string(),
                ..Default::default()
            })
        }
    }

    fn manager(workers: usize, max_tasks: usize, gate: Option<Arc<Notify>>) -> TaskManager {
        let scraper = GatedScraper {
            gated: gate.is_some(),
            gate: gate.unwrap_or_default(),
        };
        let pipeline = ScrapePipeline::new(
            Arc::new(scraper),
            ProcessingClient::new("127.0.0.1", 1, Duration::from_secs(1)),
        );
        TaskManager::new(
            ManagerConfig {
                workers,
                max_tasks,
                queue_size: 100,
            },
            Arc::new(pipeline),
            UrlValidator::default(),
        )
    }

    async fn wait_terminal(manager: &TaskManager, id: &TaskId) -> TaskSnapshot {
        for _ in 0..200 {
            let snapshot = manager.get_status(id).await.unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", id);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_allocation() {
        let manager = manager(1, 10, None);
        let err = manager
            .submit("ftp://example.com", ScrapeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(ValidationError::Scheme(_))));
        assert_eq!(manager.stats().await.total_tasks, 0);
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let gate = Arc::new(Notify::new());
        let manager = manager(1, 10, Some(gate.clone()));
        let id = manager
            .submit("https://example.com/page", ScrapeOptions::default())
            .await
            .unwrap();

        let snapshot = manager.get_status(&id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(
            manager.get_result(&id).await.unwrap(),
            TaskResult::InProgress(TaskStatus::Pending)
        );

        manager.start().await;
        for _ in 0..200 {
            if manager.get_status(&id).await.unwrap().status == TaskStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let processing = manager.get_status(&id).await.unwrap();
        assert_eq!(processing.status, TaskStatus::Processing);
        assert!(processing.started_at.is_some());

        gate.notify_one();
        let done = wait_terminal(&manager, &id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.has_result);
        assert!(done.completed_at.is_some());

        match manager.get_result(&id).await.unwrap() {
            TaskResult::Completed(result) => {
                assert_eq!(result["scraping_data"]["title"], "/page");
                assert_eq!(result["status"], "success");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_scrape_failure_marks_task_failed() {
        let manager = manager(2, 10, None);
        manager.start().await;
        let id = manager
            .submit("https://example.com/fail", ScrapeOptions::default())
            .await
            .unwrap();

        let done = wait_terminal(&manager, &id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(!done.has_result);
        match manager.get_result(&id).await.unwrap() {
            TaskResult::Failed(error) => assert!(error.contains("HTTP 500")),
            other => panic!("unexpected result: {:?}", other),
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_ids() {
        let manager = Arc::new(manager(4, 100, None));
        manager.start().await;

        let (a, b) = tokio::join!(
            manager.submit("https://example.com/a", ScrapeOptions::default()),
            manager.submit("https://example.com/b", ScrapeOptions::default())
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);

        assert_eq!(wait_terminal(&manager, &a).await.status, TaskStatus::Completed);
        assert_eq!(wait_terminal(&manager, &b).await.status, TaskStatus::Completed);

        let stats = manager.stats().await;
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.max_tasks, 100);
        assert_eq!(stats.workers, 4);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_eviction_keeps_store_bounded() {
        let manager = manager(1, 3, None);
        let mut ids = Vec::new();
        for i in 0..5 {
            let url = format!("https://example.com/{}", i);
            ids.push(manager.submit(&url, ScrapeOptions::default()).await.unwrap());
        }
        assert_eq!(manager.stats().await.total_tasks, 3);
        assert!(matches!(
            manager.get_status(&ids[0]).await,
            Err(TaskError::NotFound(_))
        ));

        // Evicted ids are skipped by the consumers.
        manager.start().await;
        for id in &ids[2..] {
            assert_eq!(wait_terminal(&manager, id).await.status, TaskStatus::Completed);
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_task_not_found() {
        let manager = manager(1, 10, None);
        let id = TaskId::new();
        assert!(matches!(manager.get_status(&id).await, Err(TaskError::NotFound(_))));
        assert!(matches!(manager.get_result(&id).await, Err(TaskError::NotFound(_))));
    }
}
