//! Command line / environment configuration for the servers and the client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::limits::{
    DEFAULT_MAX_TASKS, DEFAULT_PROCESSING_PORT, DEFAULT_PROCESSING_TIMEOUT_SECS,
    DEFAULT_SCRAPING_PORT, DEFAULT_SCRAPING_TIMEOUT_SECS, DEFAULT_WORKERS, MAX_FRAME_BYTES,
    MAX_PROCESSING_TIMEOUT_SECS, MAX_SCRAPING_TIMEOUT_SECS, MAX_WORKERS, MIN_SCRAPING_TIMEOUT_SECS,
    MIN_WORKERS,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port must be between 1 and 65535")]
    Port,

    #[error("workers must be between {MIN_WORKERS} and {MAX_WORKERS}, got {0}")]
    Workers(usize),

    #[error("timeout must be between {min} and {max} seconds, got {value}")]
    Timeout { value: u64, min: u64, max: u64 },

    #[error("max tasks must be at least 1")]
    MaxTasks,

    #[error("processes must be between {MIN_WORKERS} and {MAX_WORKERS}, got {0}")]
    Processes(usize),

    #[error("max frame size must be at least 1 byte")]
    FrameSize,
}

/// Scraping server (front tier).
#[derive(Parser, Debug, Clone)]
#[command(name = "scrapeflow-server")]
#[command(about = "Asynchronous web scraping server with task lifecycle management")]
pub struct FrontConfig {
    /// Address to listen on (IPv4 or IPv6)
    #[arg(short, long, env = "SCRAPEFLOW_IP", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub ip: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "SCRAPEFLOW_PORT", default_value_t = DEFAULT_SCRAPING_PORT)]
    pub port: u16,

    /// Concurrent background scrape workers
    #[arg(short, long, env = "SCRAPEFLOW_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Processing server host
    #[arg(long, env = "SCRAPEFLOW_PROCESSOR_HOST", default_value = "127.0.0.1")]
    pub processor_host: String,

    /// Processing server port
    #[arg(long, env = "SCRAPEFLOW_PROCESSOR_PORT", default_value_t = DEFAULT_PROCESSING_PORT)]
    pub processor_port: u16,

    /// Per-request timeout in seconds (page fetch and synchronous requests)
    #[arg(short, long, env = "SCRAPEFLOW_TIMEOUT", default_value_t = DEFAULT_SCRAPING_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Timeout in seconds for each call to the processing server
    #[arg(long, env = "SCRAPEFLOW_PROCESSING_TIMEOUT", default_value_t = DEFAULT_PROCESSING_TIMEOUT_SECS)]
    pub processing_timeout: u64,

    /// Task records kept in memory before the oldest are evicted
    #[arg(long, env = "SCRAPEFLOW_MAX_TASKS", default_value_t = DEFAULT_MAX_TASKS)]
    pub max_tasks: usize,

    /// Allow scraping localhost and private network addresses
    #[arg(long, env = "SCRAPEFLOW_ALLOW_PRIVATE_HOSTS")]
    pub allow_private_hosts: bool,
}

impl FrontConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 || self.processor_port == 0 {
            return Err(ConfigError::Port);
        }
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::Workers(self.workers));
        }
        check_timeout(self.timeout, MIN_SCRAPING_TIMEOUT_SECS, MAX_SCRAPING_TIMEOUT_SECS)?;
        check_timeout(self.processing_timeout, 1, MAX_PROCESSING_TIMEOUT_SECS)?;
        if self.max_tasks == 0 {
            return Err(ConfigError::MaxTasks);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout)
    }
}

impl Default for FrontConfig {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_SCRAPING_PORT,
            workers: DEFAULT_WORKERS,
            processor_host: "127.0.0.1".to_string(),
            processor_port: DEFAULT_PROCESSING_PORT,
            timeout: DEFAULT_SCRAPING_TIMEOUT_SECS,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT_SECS,
            max_tasks: DEFAULT_MAX_TASKS,
            allow_private_hosts: false,
        }
    }
}

/// Processing server (compute tier).
#[derive(Parser, Debug, Clone)]
#[command(name = "scrapeflow-processor")]
#[command(about = "Processing server running enrichment tasks in a pool of worker processes")]
pub struct ComputeConfig {
    /// Address to listen on (IPv4 or IPv6)
    #[arg(short, long, env = "SCRAPEFLOW_PROCESSOR_IP", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub ip: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "SCRAPEFLOW_PROCESSOR_PORT", default_value_t = DEFAULT_PROCESSING_PORT)]
    pub port: u16,

    /// Worker processes (defaults to the number of CPUs)
    #[arg(short = 'n', long, env = "SCRAPEFLOW_PROCESSES")]
    pub processes: Option<usize>,

    /// Default per-task timeout in seconds
    #[arg(long, env = "SCRAPEFLOW_TASK_TIMEOUT", default_value_t = DEFAULT_PROCESSING_TIMEOUT_SECS)]
    pub task_timeout: u64,

    /// Largest accepted frame payload in bytes
    #[arg(long, env = "SCRAPEFLOW_MAX_FRAME_BYTES", default_value_t = MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Run as a pool worker speaking the frame protocol on stdin/stdout
    #[arg(long, hide = true)]
    pub worker: bool,
}

impl ComputeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Port);
        }
        if let Some(n) = self.processes {
            if !(MIN_WORKERS..=MAX_WORKERS).contains(&n) {
                return Err(ConfigError::Processes(n));
            }
        }
        check_timeout(self.task_timeout, 1, MAX_PROCESSING_TIMEOUT_SECS)?;
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::FrameSize);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Configured process count, else the CPU count clamped to the pool bounds.
    pub fn pool_size(&self) -> usize {
        self.processes
            .unwrap_or_else(num_cpus::get)
            .clamp(MIN_WORKERS, MAX_WORKERS)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout)
    }
}

/// Command line client for the scraping server.
#[derive(Parser, Debug, Clone)]
#[command(name = "scrapeflow-client")]
#[command(about = "Send a scrape request to a scrapeflow server and show the result")]
pub struct ClientConfig {
    /// Page to scrape
    #[arg(long)]
    pub url: String,

    /// Scraping server host
    #[arg(long, env = "SCRAPEFLOW_SERVER_HOST", default_value = "127.0.0.1")]
    pub server_host: String,

    /// Scraping server port
    #[arg(long, env = "SCRAPEFLOW_SERVER_PORT", default_value_t = DEFAULT_SCRAPING_PORT)]
    pub server_port: u16,

    /// Overall request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Also request screenshot, performance and thumbnail enrichment
    #[arg(long)]
    pub process: bool,

    /// Save the JSON result to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Print a readable summary instead of raw JSON
    #[arg(long)]
    pub pretty: bool,

    /// Log request details
    #[arg(short, long)]
    pub verbose: bool,
}

impl ClientConfig {
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

fn check_timeout(value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Timeout { value, min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_defaults() {
        let config = FrontConfig::try_parse_from(["scrapeflow-server"]).unwrap();
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:8000");
        assert_eq!(config.workers, 4);
        assert_eq!(config.processor_port, 9000);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(!config.allow_private_hosts);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_front_flags_and_ipv6() {
        let config = FrontConfig::try_parse_from([
            "scrapeflow-server",
            "--ip",
            "::1",
            "--port",
            "8080",
            "--workers",
            "8",
            "--allow-private-hosts",
        ])
        .unwrap();
        assert_eq!(config.bind_addr().to_string(), "[::1]:8080");
        assert_eq!(config.workers, 8);
        assert!(config.allow_private_hosts);
    }

    #[test]
    fn test_front_validation() {
        let mut config = FrontConfig {
            workers: 64,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Workers(64)));

        config.workers = 4;
        config.timeout = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Timeout { value: 1, .. })));

        config.timeout = 30;
        config.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::Port));

        assert!(FrontConfig::try_parse_from(["scrapeflow-server", "--ip", "not-an-ip"]).is_err());
    }

    #[test]
    fn test_compute_config() {
        let config = ComputeConfig::try_parse_from(["scrapeflow-processor", "-n", "3"]).unwrap();
        assert_eq!(config.pool_size(), 3);
        assert_eq!(config.bind_addr().port(), 9000);
        assert_eq!(config.task_timeout(), Duration::from_secs(60));
        assert!(!config.worker);
        assert!(config.validate().is_ok());

        let config = ComputeConfig::try_parse_from(["scrapeflow-processor"]).unwrap();
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&config.pool_size()));

        let worker = ComputeConfig::try_parse_from(["scrapeflow-processor", "--worker"]).unwrap();
        assert!(worker.worker);

        let bad = ComputeConfig::try_parse_from(["scrapeflow-processor", "-n", "99"]).unwrap();
        assert_eq!(bad.validate(), Err(ConfigError::Processes(99)));
    }

    #[test]
    fn test_client_config() {
        let config = ClientConfig::try_parse_from([
            "scrapeflow-client",
            "--url",
            "https://example.com",
            "--server-port",
            "8080",
            "--process",
            "--output",
            "out.json",
            "-v",
        ])
        .unwrap();
        assert_eq!(config.server_url(), "http://127.0.0.1:8080");
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert!(config.process);
        assert!(config.verbose);
        assert!(!config.pretty);
        assert_eq!(config.output, Some(PathBuf::from("out.json")));

        assert!(ClientConfig::try_parse_from(["scrapeflow-client"]).is_err());
    }
}
