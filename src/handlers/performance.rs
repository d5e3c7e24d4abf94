//! Page load analysis: times the document fetch, fetches the resources the
//! page references and scores the result.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::{param_u64, Params, TaskHandler};
use crate::limits::{
    safe_timeout, DEFAULT_SCRAPING_TIMEOUT_SECS, MAX_SCRAPING_TIMEOUT_SECS, USER_AGENT,
};
use crate::protocol::TaskKind;
use crate::scraper::{extract_resources, Resource, ResourceKind};

/// Sub-resources fetched per analysis.
const MAX_RESOURCES: usize = 40;
const RESOURCE_CONCURRENCY: usize = 6;
const LARGEST_RESOURCES: usize = 5;

const SLOW_LOAD_MS: u64 = 3000;
const VERY_SLOW_LOAD_MS: u64 = 6000;
const HEAVY_PAGE_KB: f64 = 3072.0;
const MANY_REQUESTS: usize = 30;
const MANY_SCRIPTS: usize = 15;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeStats {
    pub count: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceEntry {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSummary {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub total_size_kb: f64,
    pub total_size_mb: f64,
    pub by_type: BTreeMap<String, TypeStats>,
    pub largest_resources: Vec<ResourceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub load_time_ms: u64,
    pub document_size_kb: f64,
    pub status_code: u16,
    pub resources: ResourceSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub score: u8,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct PerformanceHandler {
    client: reqwest::Client,
}

impl PerformanceHandler {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_size(&self, resource: &Resource, timeout: Duration) -> Option<u64> {
        let response = self
            .client
            .get(&resource.url)
            .timeout(timeout)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        let body = response.bytes().await.ok()?;
        Some(body.len() as u64)
    }
}

impl Default for PerformanceHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for PerformanceHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Performance
    }

    async fn execute(&self, url: &str, params: &Params) -> anyhow::Result<Params> {
        let page_url = Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", url, e))?;
        let timeout = safe_timeout(
            param_u64(params, "timeout"),
            MAX_SCRAPING_TIMEOUT_SECS,
            DEFAULT_SCRAPING_TIMEOUT_SECS,
        );

        let started = Instant::now();
        let response = self
            .client
            .get(page_url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load page: {}", e))?;
        let status_code = response.status().as_u16();
        let base = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read page: {}", e))?;
        let load_time_ms = started.elapsed().as_millis() as u64;

        let mut resources = extract_resources(&html, &base);
        resources.truncate(MAX_RESOURCES);
        tracing::debug!("Fetching {} resources of {}", resources.len(), url);

        let fetched: Vec<(Resource, Option<u64>)> = stream::iter(resources)
            .map(|resource| async move {
                let size = self.fetch_size(&resource, timeout).await;
                (resource, size)
            })
            .buffer_unordered(RESOURCE_CONCURRENCY)
            .collect()
            .await;

        let metrics = PerformanceMetrics {
            load_time_ms,
            document_size_kb: round2(html.len() as f64 / 1024.0),
            status_code,
            resources: summarize(html.len() as u64, &fetched),
        };
        let insights = compute_insights(&metrics);

        tracing::info!(
            "Performance for {}: {}ms, {} requests, score {}",
            url,
            metrics.load_time_ms,
            metrics.resources.total_requests,
            insights.score
        );

        let mut result = Params::new();
        result.insert("metrics".into(), serde_json::to_value(&metrics)?);
        result.insert("insights".into(), serde_json::to_value(&insights)?);
        result.insert("url".into(), Value::String(url.to_string()));
        Ok(result)
    }
}

/// Aggregate fetched resources. The document itself counts as one request.
fn summarize(document_size: u64, fetched: &[(Resource, Option<u64>)]) -> ResourceSummary {
    let mut summary = ResourceSummary {
        total_requests: 1 + fetched.len(),
        ..Default::default()
    };

    let mut entries = Vec::new();
    let mut total = document_size;
    for (resource, size) in fetched {
        let stats = summary
            .by_type
            .entry(kind_label(resource.kind).to_string())
            .or_default();
        stats.count += 1;
        match size {
            Some(size) => {
                stats.total_size += size;
                total += size;
                entries.push(ResourceEntry {
                    url: resource.url.clone(),
                    kind: resource.kind,
                    size: *size,
                });
            }
            None => summary.failed_requests += 1,
        }
    }
    let document = summary.by_type.entry("document".to_string()).or_default();
    document.count += 1;
    document.total_size += document_size;

    entries.sort_by(|a, b| b.size.cmp(&a.size));
    entries.truncate(LARGEST_RESOURCES);
    summary.largest_resources = entries;
    summary.total_size_kb = round2(total as f64 / 1024.0);
    summary.total_size_mb = round2(total as f64 / (1024.0 * 1024.0));
    summary
}

fn kind_label(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Script => "script",
        ResourceKind::Stylesheet => "stylesheet",
        ResourceKind::Image => "image",
    }
}

/// Score a page out of 100 and explain the deductions.
pub fn compute_insights(metrics: &PerformanceMetrics) -> Insights {
    let mut score: i32 = 100;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let resources = &metrics.resources;

    if metrics.load_time_ms > VERY_SLOW_LOAD_MS {
        score -= 30;
        issues.push(format!("Very slow document load ({} ms)", metrics.load_time_ms));
        recommendations.push("Reduce server response time or enable caching".to_string());
    } else if metrics.load_time_ms > SLOW_LOAD_MS {
        score -= 15;
        issues.push(format!("Slow document load ({} ms)", metrics.load_time_ms));
        recommendations.push("Reduce server response time or enable caching".to_string());
    }

    if resources.total_size_kb > HEAVY_PAGE_KB {
        score -= 20;
        issues.push(format!("Heavy page ({:.2} MB)", resources.total_size_mb));
        recommendations.push("Compress images and minify scripts and stylesheets".to_string());
    }

    if resources.total_requests > MANY_REQUESTS {
        score -= 15;
        issues.push(format!("Many HTTP requests ({})", resources.total_requests));
        recommendations.push("Bundle resources to reduce the number of requests".to_string());
    }

    let scripts = resources.by_type.get("script").map(|s| s.count).unwrap_or(0);
    if scripts > MANY_SCRIPTS {
        score -= 10;
        issues.push(format!("Many scripts ({})", scripts));
        recommendations.push("Defer or combine non-critical scripts".to_string());
    }

    if resources.failed_requests > 0 {
        score -= 5 * resources.failed_requests.min(4) as i32;
        issues.push(format!("{} resources failed to load", resources.failed_requests));
        recommendations.push("Fix or remove broken resource references".to_string());
    }

    if metrics.status_code >= 400 {
        score -= 30;
        issues.push(format!("Document returned HTTP {}", metrics.status_code));
    }

    Insights {
        score: score.clamp(0, 100) as u8,
        issues,
        recommendations,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: ResourceKind, url: &str) -> Resource {
        Resource {
            kind,
            url: url.to_string(),
        }
    }

    fn metrics(load_time_ms: u64, resources: ResourceSummary) -> PerformanceMetrics {
        PerformanceMetrics {
            load_time_ms,
            document_size_kb: 10.0,
            status_code: 200,
            resources,
        }
    }

    #[test]
    fn test_summarize_counts_document_and_failures() {
        let fetched = vec![
            (resource(ResourceKind::Script, "https://a/x.js"), Some(2048)),
            (resource(ResourceKind::Image, "https://a/big.png"), Some(8192)),
            (resource(ResourceKind::Image, "https://a/missing.png"), None),
        ];
        let summary = summarize(1024, &fetched);

        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.by_type["image"].count, 2);
        assert_eq!(summary.by_type["image"].total_size, 8192);
        assert_eq!(summary.by_type["document"].total_size, 1024);
        assert_eq!(summary.total_size_kb, 11.0);
        assert_eq!(summary.largest_resources[0].url, "https://a/big.png");
    }

    #[test]
    fn test_fast_light_page_scores_full() {
        let insights = compute_insights(&metrics(250, summarize(1024, &[])));
        assert_eq!(insights.score, 100);
        assert!(insights.issues.is_empty());
        assert!(insights.recommendations.is_empty());
    }

    #[test]
    fn test_slow_heavy_page_is_penalized() {
        let fetched: Vec<_> = (0..35)
            .map(|i| {
                (
                    resource(ResourceKind::Script, &format!("https://a/{}.js", i)),
                    Some(200 * 1024),
                )
            })
            .collect();
        let insights = compute_insights(&metrics(7000, summarize(0, &fetched)));

        // 100 - 30 (very slow) - 20 (heavy) - 15 (requests) - 10 (scripts)
        assert_eq!(insights.score, 25);
        assert_eq!(insights.issues.len(), 4);
        assert_eq!(insights.recommendations.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_url_is_error() {
        let handler = PerformanceHandler::new();
        let err = handler.execute("not a url", &Params::new()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid URL"));
    }
}
