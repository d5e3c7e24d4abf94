//! Request/response messages exchanged between the scraping and processing tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Kinds of work the processing tier knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Screenshot,
    Performance,
    Thumbnails,
    /// Connectivity check: echoes the request params back.
    Test,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Screenshot,
        TaskKind::Performance,
        TaskKind::Thumbnails,
        TaskKind::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Performance => "performance",
            Self::Thumbnails => "thumbnails",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task type: {0}")]
pub struct UnknownTaskKind(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTaskKind(s.to_string()))
    }
}

/// A unit of work sent to the processing tier.
///
/// The tag is kept as a raw string on the wire so an unknown tag can be
/// answered with an error response instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(alias = "task_type")]
    pub task: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl TaskRequest {
    pub fn new(kind: TaskKind, url: impl Into<String>) -> Self {
        Self {
            task: kind.as_str().to_string(),
            url: url.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> Result<TaskKind, UnknownTaskKind> {
        self.task.parse()
    }
}

/// Outcome of one request. Exactly one of `result`/`error` exists by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskResponse {
    Success { result: Map<String, Value> },
    Error { error: String },
}

impl TaskResponse {
    pub fn success(result: Map<String, Value>) -> Self {
        TaskResponse::Success { result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TaskResponse::Error {
            error: message.into(),
        }
    }

    /// Response sent when a task exceeds its time budget.
    pub fn timeout() -> Self {
        Self::error("timeout")
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResponse::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_kind_parse() {
        assert_eq!("screenshot".parse::<TaskKind>(), Ok(TaskKind::Screenshot));
        assert_eq!("thumbnails".parse::<TaskKind>(), Ok(TaskKind::Thumbnails));
        let err = "render".parse::<TaskKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown task type: render");
    }

    #[test]
    fn test_request_accepts_task_type_alias() {
        let req: TaskRequest =
            serde_json::from_value(json!({"task_type": "performance", "url": "https://a.b"}))
                .unwrap();
        assert_eq!(req.kind(), Ok(TaskKind::Performance));
        assert!(req.params.is_empty());

        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["task"], "performance");
    }

    #[test]
    fn test_response_wire_shape() {
        let mut result = Map::new();
        result.insert("load_time_ms".into(), json!(12));
        let ok = serde_json::to_value(TaskResponse::success(result)).unwrap();
        assert_eq!(ok, json!({"status": "success", "result": {"load_time_ms": 12}}));

        let err = serde_json::to_value(TaskResponse::timeout()).unwrap();
        assert_eq!(err, json!({"status": "error", "error": "timeout"}));
    }

    #[test]
    fn test_response_rejects_unknown_status() {
        let parsed = serde_json::from_value::<TaskResponse>(json!({"status": "maybe"}));
        assert!(parsed.is_err());
    }
}
