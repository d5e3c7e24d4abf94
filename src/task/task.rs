//! Scrape task record and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::pipeline::ScrapeOptions;
use crate::scraper::ValidationError;

/// Opaque task identifier, a random UUID assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle: `Pending -> Processing -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Terminal outcome; a task holds either a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Value),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    url: Url,
    options: ScrapeOptions,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    outcome: Option<TaskOutcome>,
}

impl Task {
    pub fn new(url: Url, options: ScrapeOptions) -> Self {
        Self {
            id: TaskId::new(),
            url,
            options,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn options(&self) -> ScrapeOptions {
        self.options
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Pending -> Processing`, stamping `started_at`.
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: Value) -> Result<(), TaskError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.outcome = Some(TaskOutcome::Completed(result));
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.outcome = Some(TaskOutcome::Failed(error.into()));
        Ok(())
    }

    /// Apply a terminal outcome produced by the execution loop.
    pub fn finish(&mut self, outcome: TaskOutcome) -> Result<(), TaskError> {
        match outcome {
            TaskOutcome::Completed(result) => self.complete(result),
            TaskOutcome::Failed(error) => self.fail(error),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            url: self.url.to_string(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            has_result: matches!(self.outcome, Some(TaskOutcome::Completed(_))),
            error: match &self.outcome {
                Some(TaskOutcome::Failed(error)) => Some(error.clone()),
                _ => None,
            },
        }
    }
}

/// Point-in-time view of a task as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub url: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub has_result: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::new(
            Url::parse("https://example.com").unwrap(),
            ScrapeOptions::default(),
        )
    }

    #[test]
    fn test_happy_path_sets_timestamps_once() {
        let mut task = task();
        let snapshot = task.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert!(snapshot.started_at.is_none());
        assert!(snapshot.completed_at.is_none());

        task.start().unwrap();
        let started = task.snapshot().started_at.unwrap();
        assert!(started >= task.created_at());

        task.complete(json!({"ok": true})).unwrap();
        let snapshot = task.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.started_at, Some(started));
        assert!(snapshot.completed_at.unwrap() >= started);
        assert!(snapshot.has_result);
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut task = task();
        task.start().unwrap();
        task.fail("boom").unwrap();

        assert!(task.start().is_err());
        assert!(task.complete(json!(1)).is_err());
        assert!(task.fail("again").is_err());
        assert_eq!(task.outcome(), Some(&TaskOutcome::Failed("boom".into())));

        let snapshot = task.snapshot();
        assert!(!snapshot.has_result);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cannot_skip_processing() {
        let mut task = task();
        let err = task.complete(json!(1)).unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            }
        ));
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.outcome().is_none());
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let value = serde_json::to_value(task().snapshot()).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["url"], "https://example.com/");
        assert_eq!(value["has_result"], false);
        assert!(value["started_at"].is_null());
        assert!(value["task_id"].is_string());
    }
}
