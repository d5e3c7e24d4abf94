//! Page screenshots through a headless Chromium-family browser.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{param_bool, param_u64, Params, TaskHandler};
use crate::limits::{
    safe_timeout, DEFAULT_SCRAPING_TIMEOUT_SECS, MAX_IMAGE_DIMENSION, MAX_SCRAPING_TIMEOUT_SECS,
};
use crate::protocol::TaskKind;

const BROWSER_ENV: &str = "SCRAPEFLOW_BROWSER";
const BROWSER_CANDIDATES: &[&str] = &["chromium", "chromium-browser", "google-chrome", "google-chrome-stable"];

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
/// Viewport height used to approximate a full-page capture.
const FULL_PAGE_HEIGHT: u32 = MAX_IMAGE_DIMENSION;

pub struct ScreenshotHandler {
    browser: Option<PathBuf>,
}

impl ScreenshotHandler {
    pub fn new(browser: Option<PathBuf>) -> Self {
        Self { browser }
    }

    /// Use `SCRAPEFLOW_BROWSER` if set, otherwise search `PATH`.
    pub fn from_env() -> Self {
        let browser = env::var_os(BROWSER_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                let path = env::var_os("PATH")?;
                BROWSER_CANDIDATES
                    .iter()
                    .find_map(|name| find_in_path(name, &path))
            });
        Self::new(browser)
    }

    pub fn browser(&self) -> Option<&Path> {
        self.browser.as_deref()
    }
}

#[async_trait]
impl TaskHandler for ScreenshotHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::Screenshot
    }

    async fn execute(&self, url: &str, params: &Params) -> anyhow::Result<Params> {
        let browser = self.browser.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No headless browser found (set {} or install one of: {})",
                BROWSER_ENV,
                BROWSER_CANDIDATES.join(", ")
            )
        })?;
        url::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", url, e))?;

        let width = clamp_dimension(param_u64(params, "width"), DEFAULT_WIDTH);
        let height = clamp_dimension(param_u64(params, "height"), DEFAULT_HEIGHT);
        let full_page = param_bool(params, "full_page").unwrap_or(false);
        let timeout = safe_timeout(
            param_u64(params, "timeout"),
            MAX_SCRAPING_TIMEOUT_SECS,
            DEFAULT_SCRAPING_TIMEOUT_SECS,
        );
        let viewport_height = if full_page { FULL_PAGE_HEIGHT } else { height };

        let dir = tempfile::tempdir()?;
        let output = dir.path().join("screenshot.png");

        let mut cmd = Command::new(browser);
        cmd.args(browser_args(&output, width, viewport_height, timeout.as_millis() as u64))
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Capturing {} with {}", url, browser.display());
        let child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to launch browser {}: {}", browser.display(), e))?;

        let finished = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("Screenshot timed out after {} seconds", timeout.as_secs()),
        };
        if !output.exists() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            anyhow::bail!(
                "Browser exited with {} without writing a screenshot: {}",
                finished.status,
                stderr.lines().last().unwrap_or("").trim()
            );
        }

        let bytes = tokio::fs::read(&output).await?;
        let (actual_width, actual_height) = image::load_from_memory(&bytes)
            .map(|img| (img.width(), img.height()))
            .unwrap_or((width, viewport_height));

        tracing::info!(
            "Screenshot of {} captured ({}x{}, {} bytes)",
            url,
            actual_width,
            actual_height,
            bytes.len()
        );

        let mut result = Params::new();
        result.insert(
            "screenshot".into(),
            Value::String(base64::engine::general_purpose::STANDARD.encode(&bytes)),
        );
        result.insert("format".into(), json!("png"));
        result.insert("encoding".into(), json!("base64"));
        result.insert(
            "dimensions".into(),
            json!({"width": actual_width, "height": actual_height}),
        );
        result.insert("full_page".into(), json!(full_page));
        result.insert("size_bytes".into(), json!(bytes.len()));
        Ok(result)
    }
}

fn browser_args(output: &Path, width: u32, height: u32, budget_ms: u64) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--hide-scrollbars".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!("--window-size={},{}", width, height),
        format!("--timeout={}", budget_ms),
        format!("--screenshot={}", output.display()),
    ]
}

fn clamp_dimension(requested: Option<u64>, default: u32) -> u32 {
    requested
        .map(|v| v.clamp(1, MAX_IMAGE_DIMENSION as u64) as u32)
        .unwrap_or(default)
}

fn find_in_path(name: &str, path: &OsStr) -> Option<PathBuf> {
    env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_dimension() {
        assert_eq!(clamp_dimension(None, DEFAULT_WIDTH), 1280);
        assert_eq!(clamp_dimension(Some(0), DEFAULT_WIDTH), 1);
        assert_eq!(clamp_dimension(Some(100_000), DEFAULT_HEIGHT), MAX_IMAGE_DIMENSION);
    }

    #[test]
    fn test_browser_args() {
        let args = browser_args(Path::new("/tmp/out.png"), 800, 600, 5000);
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--window-size=800,600".to_string()));
        assert!(args.contains(&"--screenshot=/tmp/out.png".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("chromium");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("google-chrome");
        std::fs::write(&plain, "").unwrap();

        let path = env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_in_path("chromium", &path), Some(exe));
        assert_eq!(find_in_path("google-chrome", &path), None);
        assert_eq!(find_in_path("missing", &path), None);
    }

    #[tokio::test]
    async fn test_missing_browser_is_error() {
        let handler = ScreenshotHandler::new(None);
        let err = handler
            .execute("https://example.com", &Params::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No headless browser found"));
    }
}
