//! Page scraping collaborator used by the front tier.

mod extract;
pub mod validate;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::limits::USER_AGENT;

pub use extract::{
    analyze_structure, extract_image_urls, extract_links, extract_meta_tags, extract_resources,
    extract_title, Resource, ResourceKind, ScrapingData,
};
pub use validate::{UrlValidator, ValidationError};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read page body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            ScrapeError::Status(status.as_u16())
        } else if e.is_body() || e.is_decode() {
            ScrapeError::Body(e.to_string())
        } else {
            ScrapeError::Request(e.to_string())
        }
    }
}

/// Fetches a page and extracts its structured data.
#[async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape(&self, url: &Url) -> Result<ScrapingData, ScrapeError>;
}

/// [`PageScraper`] backed by a plain HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpScraper {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpScraper {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Request(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl PageScraper for HttpScraper {
    async fn scrape(&self, url: &Url) -> Result<ScrapingData, ScrapeError> {
        tracing::debug!("Scraping {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScrapeError::Timeout(self.timeout)
                } else {
                    e.into()
                }
            })?
            .error_for_status()?;

        // Relative links resolve against the final URL after redirects.
        let base = response.url().clone();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(self.timeout)
            } else {
                ScrapeError::Body(e.to_string())
            }
        })?;

        let data = ScrapingData::from_html(&html, &base);
        tracing::info!(
            "Scraped {}: {} links, {} images",
            url,
            data.links_count,
            data.images_count
        );
        Ok(data)
    }
}
