//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::FrontConfig;
use crate::pipeline::{PipelineError, ScrapeOptions, ScrapePipeline, ScrapeReport};
use crate::processing::ProcessingClient;
use crate::scraper::{HttpScraper, PageScraper, UrlValidator};
use crate::task::{ManagerConfig, TaskId, TaskManager, TaskResult, TaskStatus};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: FrontConfig,
    /// Background task lifecycle
    pub manager: TaskManager,
    /// Used inline by the synchronous endpoint
    pub pipeline: Arc<ScrapePipeline>,
    pub validator: UrlValidator,
}

impl AppState {
    /// Build the state around a page scraper. The task manager is created
    /// but not started.
    pub fn new(config: FrontConfig, scraper: Arc<dyn PageScraper>) -> Self {
        let processor = ProcessingClient::new(
            config.processor_host.clone(),
            config.processor_port,
            config.processing_timeout(),
        );
        let pipeline = Arc::new(ScrapePipeline::new(scraper, processor));
        let validator = UrlValidator::new(config.allow_private_hosts);
        let manager = TaskManager::new(
            ManagerConfig {
                workers: config.workers,
                max_tasks: config.max_tasks,
                ..Default::default()
            },
            Arc::clone(&pipeline),
            validator,
        );

        Self {
            config,
            manager,
            pipeline,
            validator,
        }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scrape", get(scrape).post(scrape))
        .route("/scrape/async", post(scrape_async))
        .route("/status/:task_id", get(get_status))
        .route("/result/:task_id", get(get_result))
        .route("/stats", get(get_stats))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: FrontConfig) -> anyhow::Result<()> {
    config.validate()?;

    let scraper: Arc<dyn PageScraper> = Arc::new(HttpScraper::new(config.request_timeout())?);
    let state = Arc::new(AppState::new(config.clone(), scraper));
    state.manager.start().await;

    let app = router(Arc::clone(&state));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Scraping server listening on {}", addr);
    tracing::info!(
        "Processing server: {}:{}",
        config.processor_host,
        config.processor_port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.manager.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// URL and options from the query string, overridden by a JSON body.
fn scrape_request(query: ScrapeQuery, body: &Bytes) -> Result<(String, ScrapeOptions), ApiError> {
    let body: ScrapeBody = if body.iter().all(u8::is_ascii_whitespace) {
        ScrapeBody::default()
    } else {
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest {
            message: "Invalid JSON body".to_string(),
            details: Some(e.to_string()),
        })?
    };

    let url = body.url.or(query.url).unwrap_or_default();
    let process = body
        .process
        .unwrap_or_else(|| parse_flag(query.process.as_deref()));
    Ok((url, ScrapeOptions::with_processing(process)))
}

/// Scrape a page inline and return the consolidated result.
async fn scrape(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScrapeQuery>,
    body: Bytes,
) -> Result<Json<ScrapeReport>, ApiError> {
    let (raw, options) = scrape_request(query, &body)?;
    let url = state.validator.validate(&raw).map_err(|e| {
        tracing::warn!("Rejected scrape request for '{}': {}", raw, e);
        ApiError::from(e)
    })?;

    tracing::info!("Scraping {} (process={})", url, options.process);

    let budget = state.config.request_timeout();
    match state.pipeline.run_within(&url, options, budget).await {
        Ok(report) => Ok(Json(report)),
        Err(PipelineError::Timeout(_)) => {
            tracing::error!("Scrape of {} exceeded {:?}", url, budget);
            Err(ApiError::Timeout(budget.as_secs()))
        }
        Err(e) => {
            tracing::error!("Scrape of {} failed: {}", url, e);
            Err(ApiError::ScrapeFailed(e.to_string()))
        }
    }
}

/// Queue a scrape task and return its id immediately.
async fn scrape_async(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScrapeQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let (raw, options) = scrape_request(query, &body)?;
    let task_id = state.manager.submit(&raw, options).await.map_err(|e| {
        tracing::warn!("Rejected async scrape request for '{}': {}", raw, e);
        ApiError::from(e)
    })?;

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(task_id))))
}

fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse().map_err(|_| ApiError::task_not_found(raw))
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_task_id(&task_id)?;
    let task = state.manager.get_status(&id).await?;
    Ok(Json(StatusResponse { task }))
}

async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_task_id(&task_id)?;
    let response = match state.manager.get_result(&id).await? {
        TaskResult::Completed(result) => Json(result).into_response(),
        TaskResult::Failed(error) => Json(FailedResponse {
            task_id: id,
            status: TaskStatus::Failed,
            error,
        })
        .into_response(),
        TaskResult::InProgress(status) => (
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                task_id: id,
                status,
                message: format!("Task is {}, result not available yet", status.as_str()),
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.manager.stats().await,
    })
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let processor = state.pipeline.processor();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "scraping-server".to_string(),
        timestamp: Utc::now(),
        workers: state.manager.workers(),
        processor: ProcessorInfo {
            host: processor.host().to_string(),
            port: processor.port(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_request_query_only() {
        let query = ScrapeQuery {
            url: Some("https://example.com".into()),
            process: Some("true".into()),
        };
        let (url, options) = scrape_request(query, &Bytes::new()).unwrap();
        assert_eq!(url, "https://example.com");
        assert!(options.process);
    }

    #[test]
    fn test_scrape_request_body_overrides_query() {
        let query = ScrapeQuery {
            url: Some("https://query.example".into()),
            process: Some("true".into()),
        };
        let body = Bytes::from_static(br#"{"url": "https://body.example", "process": false}"#);
        let (url, options) = scrape_request(query, &body).unwrap();
        assert_eq!(url, "https://body.example");
        assert!(!options.process);
    }

    #[test]
    fn test_scrape_request_rejects_bad_json() {
        let body = Bytes::from_static(b"{not json");
        let err = scrape_request(ScrapeQuery::default(), &body).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_parse_task_id() {
        assert!(parse_task_id("not-a-uuid").is_err());
        let id = TaskId::new();
        assert_eq!(parse_task_id(&id.to_string()).unwrap(), id);
    }
}
