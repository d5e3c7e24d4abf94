//! TCP front of the processing tier: one request and one response per
//! connection, executed on the worker pool.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use super::pool::WorkerPool;
use crate::handlers::param_u64;
use crate::limits::MAX_PROCESSING_TIMEOUT_SECS;
use crate::protocol::{FrameCodec, FrameError, TaskRequest, TaskResponse};

#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    /// Budget for a request that does not set `params.timeout`.
    pub default_timeout: Duration,
    pub codec: FrameCodec,
}

pub struct ProcessingServer {
    listener: TcpListener,
    pool: Arc<WorkerPool>,
    config: ListenerConfig,
}

impl ProcessingServer {
    pub async fn bind(
        addr: SocketAddr,
        pool: Arc<WorkerPool>,
        config: ListenerConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            pool,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Processing server listening on {} ({} workers)",
            self.local_addr()?,
            self.pool.size()
        );
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let pool = self.pool.clone();
            let config = self.config;
            tokio::spawn(async move {
                handle_connection(stream, peer, pool, config).await;
            });
        }

        tracing::info!("Processing server stopped accepting connections");
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    pool: Arc<WorkerPool>,
    config: ListenerConfig,
) {
    let codec = config.codec;
    let request: TaskRequest = match codec.read_message(&mut stream).await {
        Ok(request) => request,
        Err(FrameError::Closed) => {
            tracing::debug!("Connection from {} closed without a request", peer);
            return;
        }
        Err(e) if e.is_malformed() => {
            tracing::warn!("Malformed frame from {}: {}", peer, e);
            let response = TaskResponse::error(format!("MalformedFrame: {}", e));
            if let Err(write_err) = codec.write_message(&mut stream, &response).await {
                tracing::debug!("Could not report malformed frame to {}: {}", peer, write_err);
            }
            let _ = stream.shutdown().await;
            return;
        }
        Err(e) => {
            tracing::warn!("Failed to read request from {}: {}", peer, e);
            return;
        }
    };

    let response = match request.kind() {
        Ok(kind) => {
            let timeout = request_timeout(&request, config.default_timeout);
            tracing::info!("Task '{}' for {} from {}", kind, request.url, peer);
            pool.submit(request, timeout).await
        }
        Err(e) => {
            tracing::warn!("Rejected request from {}: {}", peer, e);
            TaskResponse::error(e.to_string())
        }
    };

    if let Err(e) = codec.write_message(&mut stream, &response).await {
        tracing::warn!("Failed to send response to {}: {}", peer, e);
    }
    let _ = stream.shutdown().await;
}

/// Per-request budget: `params.timeout` seconds, capped at the processing
/// maximum, else the listener default.
fn request_timeout(request: &TaskRequest, default: Duration) -> Duration {
    match param_u64(&request.params, "timeout") {
        Some(secs) if secs > 0 => Duration::from_secs(secs.min(MAX_PROCESSING_TIMEOUT_SECS)),
        _ => default,
    }
}
