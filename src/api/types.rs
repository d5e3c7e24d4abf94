//! API request and response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scraper::ValidationError;
use crate::task::{TaskError, TaskId, TaskSnapshot, TaskStats, TaskStatus};

/// Query string accepted by the scrape endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ScrapeQuery {
    pub url: Option<String>,
    pub process: Option<String>,
}

/// Optional JSON body of `POST /scrape` and `POST /scrape/async`.
#[derive(Debug, Default, Deserialize)]
pub struct ScrapeBody {
    pub url: Option<String>,
    pub process: Option<bool>,
}

/// Interpret a query flag (`true`, `1`, `yes`, `on`).
pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskEndpoints {
    pub status: String,
    pub result: String,
}

/// Response of `POST /scrape/async`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
    pub endpoints: TaskEndpoints,
}

impl AcceptedResponse {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            message: "Task submitted successfully".to_string(),
            endpoints: TaskEndpoints {
                status: format!("/status/{}", task_id),
                result: format!("/result/{}", task_id),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task: TaskSnapshot,
}

/// Result of a task that ended in failure.
#[derive(Debug, Serialize)]
pub struct FailedResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub error: String,
}

/// Result requested before the task finished.
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: TaskStats,
}

#[derive(Debug, Serialize)]
pub struct ProcessorInfo {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub workers: usize,
    pub processor: ProcessorInfo,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Error surfaced by an API handler as `{status:"error", message, details?}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<String>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Scraping failed")]
    ScrapeFailed(String),

    #[error("Request timed out")]
    Timeout(u64),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ScrapeFailed(_) | ApiError::Timeout(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn task_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Task {} not found", id))
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::BadRequest { details, .. } => details.clone(),
            ApiError::ScrapeFailed(detail) => Some(detail.clone()),
            ApiError::Timeout(secs) => Some(format!("no result within {} seconds", secs)),
            ApiError::NotFound(_) | ApiError::Internal => None,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        let details = match e {
            ValidationError::Missing => {
                Some("Provide url as query parameter (?url=...) or in JSON body".to_string())
            }
            _ => None,
        };
        let message = match e {
            ValidationError::Missing => "URL parameter is required".to_string(),
            other => other.to_string(),
        };
        ApiError::BadRequest { message, details }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Validation(e) => e.into(),
            TaskError::NotFound(id) => ApiError::task_not_found(&id),
            other @ TaskError::InvalidTransition { .. } => {
                tracing::error!("Task error reached the API: {}", other);
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            message: self.to_string(),
            details: self.details(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("TRUE")));
        assert!(parse_flag(Some("1")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(Some("")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::from(ValidationError::Missing).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TaskError::NotFound("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Timeout(30).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_missing_url_message() {
        let err = ApiError::from(ValidationError::Missing);
        assert_eq!(err.to_string(), "URL parameter is required");
        assert!(err.details().unwrap().contains("JSON body"));

        let err = ApiError::from(ValidationError::Scheme("ftp".into()));
        assert!(err.to_string().contains("ftp"));
        assert!(err.details().is_none());
    }

    #[test]
    fn test_accepted_endpoints() {
        let id = TaskId::new();
        let accepted = AcceptedResponse::new(id);
        let value = serde_json::to_value(&accepted).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["endpoints"]["status"], format!("/status/{}", id));
        assert_eq!(value["endpoints"]["result"], format!("/result/{}", id));
    }
}
