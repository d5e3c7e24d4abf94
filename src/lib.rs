//! # scrapeflow
//!
//! Asynchronous web scraping in two tiers.
//!
//! This library provides:
//! - An HTTP API for synchronous scrapes and background scrape tasks
//! - A processing server that runs enrichment work (screenshots,
//!   performance analysis, thumbnails) in a pool of worker processes
//! - The length-prefixed JSON protocol spoken between the two
//!
//! ## Architecture
//!
//! ```text
//!   HTTP client
//!        │
//!        ▼
//!  ┌─────────────────────┐   frame over TCP   ┌──────────────────────┐
//!  │  scrapeflow-server  │ ─────────────────▶ │ scrapeflow-processor │
//!  │  api / task / scrape│ ◀───────────────── │ listener → pool      │
//!  └─────────────────────┘                    └──────────┬───────────┘
//!                                                        │ stdin/stdout
//!                                                        ▼
//!                                              worker processes (handlers)
//! ```
//!
//! ## Modules
//! - `api`: HTTP routes and server
//! - `task`: Task records, bounded store and the background manager
//! - `pipeline`: Scrape, then optional enrichment
//! - `scraper`: Page fetch, HTML extraction, URL validation
//! - `processing`: Client for the processing server
//! - `protocol`: Frame codec and task messages
//! - `compute`: Processing server listener and worker pool
//! - `handlers`: Enrichment task handlers run inside workers
//! - `client`: HTTP client used by `scrapeflow-client`

pub mod api;
pub mod client;
pub mod compute;
pub mod config;
pub mod handlers;
pub mod limits;
pub mod pipeline;
pub mod processing;
pub mod protocol;
pub mod scraper;
pub mod task;

pub use config::{ClientConfig, ComputeConfig, FrontConfig};
