//! Task handlers run inside compute-tier worker processes.
//!
//! Each [`TaskKind`] maps to one [`TaskHandler`]. Handlers return
//! `anyhow::Result` and the registry turns every failure, including a panic,
//! into an error [`TaskResponse`].

mod performance;
mod screenshot;
mod thumbnails;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::{TaskKind, TaskRequest, TaskResponse};

pub use performance::PerformanceHandler;
pub use screenshot::ScreenshotHandler;
pub use thumbnails::{make_thumbnail, ThumbnailFormat, ThumbnailsHandler};

/// Request parameters as received on the wire.
pub type Params = Map<String, Value>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Unknown(#[from] crate::protocol::UnknownTaskKind),

    #[error("no handler registered for task type: {0}")]
    NotRegistered(TaskKind),

    #[error("missing required parameter '{0}'")]
    MissingParam(&'static str),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn execute(&self, url: &str, params: &Params) -> anyhow::Result<Params>;
}

/// Maps task kinds to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handler for every kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScreenshotHandler::from_env()));
        registry.register(Arc::new(PerformanceHandler::new()));
        registry.register(Arc::new(ThumbnailsHandler::new()));
        registry.register(Arc::new(EchoHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Run the request's handler and always produce a response.
    pub async fn dispatch(&self, request: &TaskRequest) -> TaskResponse {
        match self.try_dispatch(request).await {
            Ok(result) => TaskResponse::success(result),
            Err(e) => {
                tracing::warn!("Task '{}' for {} failed: {:#}", request.task, request.url, e);
                TaskResponse::error(format!("{:#}", e))
            }
        }
    }

    async fn try_dispatch(&self, request: &TaskRequest) -> anyhow::Result<Params> {
        let kind = request.kind().map_err(HandlerError::from)?;
        let handler = self.get(kind).ok_or(HandlerError::NotRegistered(kind))?;

        tracing::debug!("Running {} handler for {}", kind, request.url);
        let run = handler.execute(&request.url, &request.params);
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref())).into()),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn param_u64(params: &Params, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    })
}

pub(crate) fn param_i64(params: &Params, key: &str) -> Option<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

pub(crate) fn param_bool(params: &Params, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub(crate) fn param_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Echo handler used for connectivity checks.
///
/// Returns the request params untouched. Diagnostic params: `delay_ms`
/// sleeps before replying, `fail` turns the reply into an error and
/// `panic: true` panics inside the handler.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Test
    }

    async fn execute(&self, url: &str, params: &Params) -> anyhow::Result<Params> {
        if let Some(ms) = param_u64(params, "delay_ms") {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(message) = param_str(params, "fail") {
            anyhow::bail!("{}", message);
        }
        if param_bool(params, "panic").unwrap_or(false) {
            panic!("echo handler asked to panic");
        }

        let mut result = Map::new();
        result.insert("url".into(), Value::String(url.to_string()));
        result.insert("echo".into(), Value::Object(params.clone()));
        result.insert("pid".into(), Value::from(std::process::id()));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(task: &str, params: Value) -> TaskRequest {
        serde_json::from_value(json!({"task": task, "url": "https://example.com", "params": params}))
            .unwrap()
    }

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(registry.kinds().len(), TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            assert!(registry.get(kind).is_some(), "missing handler for {}", kind);
        }
    }

    #[tokio::test]
    async fn test_echo_returns_params() {
        let registry = HandlerRegistry::with_defaults();
        let response = registry.dispatch(&request("test", json!({"n": 7}))).await;
        match response {
            TaskResponse::Success { result } => {
                assert_eq!(result["echo"], json!({"n": 7}));
                assert_eq!(result["url"], "https://example.com");
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_is_error_response() {
        let registry = HandlerRegistry::with_defaults();
        let response = registry.dispatch(&request("render", json!({}))).await;
        assert_eq!(response, TaskResponse::error("unknown task type: render"));
    }

    #[tokio::test]
    async fn test_unregistered_kind() {
        let registry = HandlerRegistry::new();
        let response = registry.dispatch(&request("test", json!({}))).await;
        assert_eq!(
            response,
            TaskResponse::error("no handler registered for task type: test")
        );
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_become_errors() {
        let registry = HandlerRegistry::with_defaults();

        let failed = registry
            .dispatch(&request("test", json!({"fail": "boom"})))
            .await;
        assert_eq!(failed, TaskResponse::error("boom"));

        let panicked = registry
            .dispatch(&request("test", json!({"panic": true})))
            .await;
        assert_eq!(
            panicked,
            TaskResponse::error("handler panicked: echo handler asked to panic")
        );
    }

    #[test]
    fn test_param_helpers() {
        let params = json!({"a": 3, "b": 2.9, "c": -1, "d": true, "e": "x"});
        let params = params.as_object().unwrap();
        assert_eq!(param_u64(params, "a"), Some(3));
        assert_eq!(param_u64(params, "b"), Some(2));
        assert_eq!(param_u64(params, "c"), None);
        assert_eq!(param_i64(params, "c"), Some(-1));
        assert_eq!(param_bool(params, "d"), Some(true));
        assert_eq!(param_str(params, "e"), Some("x"));
        assert_eq!(param_str(params, "missing"), None);
    }
}
