//! Scrape pipeline shared by the synchronous endpoint and the task manager:
//! scrape the page, then optionally ask the processing tier for enrichment.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::limits::{DEFAULT_MAX_IMAGES, MAX_IMAGE_URLS};
use crate::processing::{ProcessingClient, TransportError};
use crate::protocol::{TaskKind, TaskRequest, TaskResponse};
use crate::scraper::{PageScraper, ScrapeError, ScrapingData};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeOptions {
    /// Also run screenshot, performance and thumbnail enrichment.
    #[serde(default)]
    pub process: bool,
}

impl ScrapeOptions {
    pub fn with_processing(process: bool) -> Self {
        Self { process }
    }
}

/// Seconds left between the budget sent to the processing tier and the
/// client's own read timeout, so the tier's `timeout` reply arrives first.
const PROCESSING_TIMEOUT_MARGIN_SECS: u64 = 2;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("scraping failed: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("scraping timed out after {0:?}")]
    Timeout(Duration),
}

/// Outcome of one enrichment step: `{"status":"success", ...}` or
/// `{"status":"error","error":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepOutcome {
    Success(Map<String, Value>),
    Error { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }

    fn skipped(message: &str) -> Self {
        let mut result = Map::new();
        result.insert("message".into(), json!(message));
        result.insert("thumbnails".into(), json!([]));
        result.insert("total_processed".into(), json!(0));
        StepOutcome::Success(result)
    }
}

impl From<TaskResponse> for StepOutcome {
    fn from(response: TaskResponse) -> Self {
        match response {
            TaskResponse::Success { result } => StepOutcome::Success(result),
            TaskResponse::Error { error } => StepOutcome::Error { error },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingData {
    pub screenshot: StepOutcome,
    pub performance: StepOutcome,
    pub thumbnails: StepOutcome,
}

/// Consolidated result of one scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub scraping_data: ScrapingData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_data: Option<ProcessingData>,
}

pub struct ScrapePipeline {
    scraper: Arc<dyn PageScraper>,
    processor: ProcessingClient,
}

impl ScrapePipeline {
    pub fn new(scraper: Arc<dyn PageScraper>, processor: ProcessingClient) -> Self {
        Self { scraper, processor }
    }

    pub fn processor(&self) -> &ProcessingClient {
        &self.processor
    }

    /// Only a failed scrape fails the pipeline; enrichment errors are
    /// recorded per step.
    pub async fn run(&self, url: &Url, options: ScrapeOptions) -> Result<ScrapeReport, PipelineError> {
        self.execute(url, options, None).await
    }

    /// Like [`run`](Self::run), bounded by `budget`. Running out of time
    /// while scraping fails the pipeline; running out during enrichment
    /// turns the unfinished steps into `TimeoutError` entries and the
    /// scrape result is still returned.
    pub async fn run_within(
        &self,
        url: &Url,
        options: ScrapeOptions,
        budget: Duration,
    ) -> Result<ScrapeReport, PipelineError> {
        self.execute(url, options, Some((Instant::now() + budget, budget)))
            .await
    }

    async fn execute(
        &self,
        url: &Url,
        options: ScrapeOptions,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<ScrapeReport, PipelineError> {
        let scraping_data = match deadline {
            Some((at, budget)) => tokio::time::timeout_at(at, self.scraper.scrape(url))
                .await
                .map_err(|_| PipelineError::Timeout(budget))??,
            None => self.scraper.scrape(url).await?,
        };

        let processing_data = if options.process {
            let step_timeout = match deadline {
                Some((at, _)) => self
                    .processor
                    .timeout()
                    .min(at.saturating_duration_since(Instant::now())),
                None => self.processor.timeout(),
            };
            Some(self.enrich(url, &scraping_data, step_timeout).await)
        } else {
            None
        };

        Ok(ScrapeReport {
            url: url.to_string(),
            timestamp: Utc::now(),
            status: "success".to_string(),
            scraping_data,
            processing_data,
        })
    }

    async fn enrich(&self, url: &Url, data: &ScrapingData, timeout: Duration) -> ProcessingData {
        let screenshot = TaskRequest::new(TaskKind::Screenshot, url.as_str());
        let performance = TaskRequest::new(TaskKind::Performance, url.as_str());

        let thumbnails = async {
            if data.image_urls.is_empty() {
                return StepOutcome::skipped("no images found");
            }
            let images: Vec<&String> = data.image_urls.iter().take(MAX_IMAGE_URLS).collect();
            let request = TaskRequest::new(TaskKind::Thumbnails, url.as_str())
                .with_param("image_urls", json!(images))
                .with_param("max_images", json!(DEFAULT_MAX_IMAGES));
            self.step(request, timeout).await
        };

        let (screenshot, performance, thumbnails) = tokio::join!(
            self.step(screenshot, timeout),
            self.step(performance, timeout),
            thumbnails
        );

        ProcessingData {
            screenshot,
            performance,
            thumbnails,
        }
    }

    async fn step(&self, request: TaskRequest, timeout: Duration) -> StepOutcome {
        if timeout.is_zero() {
            return transport_failure(&request, TransportError::Timeout(timeout));
        }

        let budget = timeout.as_secs().saturating_sub(PROCESSING_TIMEOUT_MARGIN_SECS);
        let request = if budget > 0 {
            request.with_param("timeout", json!(budget))
        } else {
            request
        };

        match self.processor.call_with_timeout(&request, timeout).await {
            Ok(response) => response.into(),
            Err(e) => transport_failure(&request, e),
        }
    }
}

fn transport_failure(request: &TaskRequest, e: TransportError) -> StepOutcome {
    tracing::warn!("Enrichment '{}' for {} unavailable: {}", request.task, request.url, e);
    StepOutcome::Error {
        error: e.to_string(),
    }
}
