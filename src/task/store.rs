//! Bounded in-memory task registry with FIFO eviction.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use super::task::{Task, TaskId, TaskOutcome, TaskSnapshot, TaskStatus};

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    /// Insertion (= creation) order, oldest first.
    order: VecDeque<TaskId>,
}

/// Every mutation happens under a single write-lock critical section, so
/// checks and the updates they guard cannot interleave.
pub struct TaskStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl TaskStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a new task, then evict the oldest tasks while over capacity
    /// regardless of their status. Returns the evicted ids.
    pub async fn insert(&self, task: Task) -> Vec<TaskId> {
        let mut inner = self.inner.write().await;
        let id = task.id();
        inner.tasks.insert(id, task);
        inner.order.push_back(id);

        let mut evicted = Vec::new();
        while inner.tasks.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else { break };
            if inner.tasks.remove(&oldest).is_some() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub async fn snapshot(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.inner.read().await.tasks.get(id).map(Task::snapshot)
    }

    /// Status and terminal outcome, read together.
    pub async fn outcome(&self, id: &TaskId) -> Option<(TaskStatus, Option<TaskOutcome>)> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(id)
            .map(|task| (task.status(), task.outcome().cloned()))
    }

    /// Atomically move a pending task to processing.
    ///
    /// Returns the task as claimed, or `None` if it was evicted or is no
    /// longer pending. At most one caller can claim a given task.
    pub async fn claim(&self, id: &TaskId) -> Option<Task> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(id)?;
        if task.status() != TaskStatus::Pending {
            return None;
        }
        task.start().ok()?;
        Some(task.clone())
    }

    /// Record a terminal outcome. Returns `false` when the task is gone
    /// (evicted) or already terminal; the outcome is then dropped.
    pub async fn finish(&self, id: &TaskId, outcome: TaskOutcome) -> bool {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(id) {
            Some(task) => task.finish(outcome).is_ok(),
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn counts(&self) -> StatusCounts {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts {
            total: inner.tasks.len(),
            ..Default::default()
        };
        for task in inner.tasks.values() {
            match task.status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
