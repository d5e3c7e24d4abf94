//! HTTP client for the scraping server, used by `scrapeflow-client`.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {0}, is the server running?")]
    Connect(String),

    #[error("no response after {0:?}")]
    Timeout(Duration),

    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),
}

pub struct ScrapeClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ScrapeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// `GET /scrape` and return the consolidated result on 200.
    pub async fn scrape(&self, url: &str, process: bool) -> Result<Value, ClientError> {
        let endpoint = format!("{}/scrape", self.base_url);
        let mut query = vec![("url", url)];
        if process {
            query.push(("process", "true"));
        }

        tracing::debug!("Sending request to {} for {}", endpoint, url);
        let response = self
            .http
            .get(&endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Server {
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else if e.is_connect() {
            ClientError::Connect(self.base_url.clone())
        } else {
            ClientError::Request(e.to_string())
        }
    }
}

/// Human readable summary of a scrape result.
pub fn render_summary(data: &Value) -> String {
    let rule = "=".repeat(70);
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "SCRAPE RESULT");
    let _ = writeln!(out, "{}", rule);

    let status = data["status"].as_str().unwrap_or("unknown");
    let _ = writeln!(out, "Status: {}", status.to_uppercase());

    let scraping = &data["scraping_data"];
    if scraping.is_object() {
        let _ = writeln!(out, "\nScraping data:");
        let _ = writeln!(out, "  Title:  {}", scraping["title"].as_str().unwrap_or("N/A"));
        let _ = writeln!(out, "  Links:  {}", scraping["links_count"].as_u64().unwrap_or(0));
        let _ = writeln!(out, "  Images: {}", scraping["images_count"].as_u64().unwrap_or(0));
        if let Some(structure) = scraping["structure"].as_object() {
            let present: Vec<_> = structure
                .iter()
                .filter(|(_, count)| count.as_u64().unwrap_or(0) > 0)
                .collect();
            if !present.is_empty() {
                let _ = writeln!(out, "  Structure:");
                for (tag, count) in present {
                    let _ = writeln!(out, "     {}: {}", tag, count);
                }
            }
        }
    }

    let processing = &data["processing_data"];
    if processing.is_object() {
        let _ = writeln!(out, "\nProcessing data:");
        for step in ["screenshot", "performance", "thumbnails"] {
            let entry = &processing[step];
            if entry["status"] != "success" {
                let error = entry["error"].as_str().unwrap_or("unavailable");
                let _ = writeln!(out, "  {}: error ({})", step, error);
                continue;
            }
            match step {
                "screenshot" => {
                    let _ = writeln!(out, "  screenshot: captured");
                }
                "performance" => {
                    let metrics = &entry["metrics"];
                    let _ = writeln!(out, "  performance:");
                    let _ = writeln!(out, "     Load time: {}ms", metrics["load_time_ms"]);
                    let _ = writeln!(out, "     Requests:  {}", metrics["resources"]["total_requests"]);
                    let _ = writeln!(out, "     Size:      {} KB", metrics["resources"]["total_size_kb"]);
                }
                _ => {
                    let count = entry["thumbnails"].as_array().map_or(0, Vec::len);
                    let _ = writeln!(out, "  thumbnails: {} generated", count);
                }
            }
        }
    }

    let _ = writeln!(out, "{}", rule);
    out
}

/// Pretty-printed JSON between rules.
pub fn render_json(data: &Value) -> serde_json::Result<String> {
    let rule = "=".repeat(70);
    Ok(format!(
        "{}\nRESPONSE\n{}\n{}\n{}\n",
        rule,
        rule,
        serde_json::to_string_pretty(data)?,
        rule
    ))
}

/// Write the result as pretty-printed JSON.
pub fn save_result(data: &Value, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    std::fs::write(path, json)?;
    Ok(())
}
