//! HTTP API of the scraping server.

mod routes;
pub mod types;

pub use routes::{router, serve, shutdown_signal, AppState};
