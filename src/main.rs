//! Scraping server entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrapeflow::{api, FrontConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = FrontConfig::parse();
    tracing::info!(
        "Starting scraping server on {} with {} workers",
        config.bind_addr(),
        config.workers
    );

    api::serve(config).await
}
