//! Processing server entry point.
//!
//! Without flags this runs the TCP listener and the worker pool. The pool
//! re-executes this binary with `--worker`, in which case it serves framed
//! task requests on stdin/stdout until stdin closes.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrapeflow::api::shutdown_signal;
use scrapeflow::compute::{
    self, ListenerConfig, PoolConfig, ProcessingServer, WorkerCommand, WorkerPool,
};
use scrapeflow::handlers::HandlerRegistry;
use scrapeflow::protocol::FrameCodec;
use scrapeflow::ComputeConfig;

fn init_tracing() {
    // stdout carries frames in worker mode, so logs always go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ComputeConfig::parse();
    config.validate()?;
    let codec = FrameCodec::new(config.max_frame_bytes);

    if config.worker {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let registry = HandlerRegistry::with_defaults();
        tracing::debug!("Worker {} ready", std::process::id());
        runtime.block_on(compute::worker::run(registry, codec))?;
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_server(config, codec))
}

async fn run_server(config: ComputeConfig, codec: FrameCodec) -> anyhow::Result<()> {
    let command = WorkerCommand::current_exe()?
        .arg("--max-frame-bytes")
        .arg(config.max_frame_bytes.to_string());

    let mut pool_config = PoolConfig::new(config.pool_size(), command);
    pool_config.codec = codec;
    let pool = Arc::new(WorkerPool::start(pool_config).await?);

    let server = ProcessingServer::bind(
        config.bind_addr(),
        Arc::clone(&pool),
        ListenerConfig {
            default_timeout: config.task_timeout(),
            codec,
        },
    )
    .await?;

    let result = server.run(shutdown_signal()).await;

    pool.shutdown().await;
    tracing::info!("Processing server stopped");
    Ok(result?)
}
