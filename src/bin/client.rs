//! Command line client for the scraping server.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrapeflow::client::{render_json, render_summary, save_result, ScrapeClient};
use scrapeflow::ClientConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::parse();

    let level = if config.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = ScrapeClient::new(config.server_url(), config.timeout())?;
    tracing::info!("Scraping {} via {}", config.url, config.server_url());

    let data = client.scrape(&config.url, config.process).await?;

    if config.pretty {
        print!("{}", render_summary(&data));
    } else {
        print!("{}", render_json(&data)?);
    }

    if let Some(path) = &config.output {
        save_result(&data, path)
            .with_context(|| format!("failed to save result to {}", path.display()))?;
        eprintln!("Result saved to {}", path.display());
    }

    Ok(())
}
