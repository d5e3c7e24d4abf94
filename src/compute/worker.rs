//! Child-process side of the worker pool.
//!
//! Reads request frames from stdin, runs them through the handler registry
//! and writes one response frame per request to stdout. Stdout carries
//! nothing but frames, so logging goes to stderr.

use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::handlers::HandlerRegistry;
use crate::protocol::{FrameCodec, FrameError, TaskRequest, TaskResponse};

/// Serve requests from `reader` until it is closed.
///
/// A malformed frame leaves the stream out of sync, so the worker answers it
/// with an error and stops.
pub async fn serve<R, W>(
    registry: &HandlerRegistry,
    codec: FrameCodec,
    reader: R,
    mut writer: W,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut served = 0u64;

    loop {
        let request: TaskRequest = match codec.read_message(&mut reader).await {
            Ok(request) => request,
            Err(FrameError::Closed) => {
                tracing::debug!("Worker {} input closed after {} tasks", std::process::id(), served);
                return Ok(());
            }
            Err(e) if e.is_malformed() => {
                tracing::warn!("Worker {} received malformed frame: {}", std::process::id(), e);
                let response = TaskResponse::error(format!("MalformedFrame: {}", e));
                let _ = codec.write_message(&mut writer, &response).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let response = registry.dispatch(&request).await;
        codec.write_message(&mut writer, &response).await?;
        served += 1;
    }
}

/// Worker entry point over the process's own stdin/stdout.
pub async fn run(registry: HandlerRegistry, codec: FrameCodec) -> Result<(), FrameError> {
    tracing::debug!(
        "Worker {} ready ({} handlers)",
        std::process::id(),
        registry.kinds().len()
    );
    serve(&registry, codec, tokio::io::stdin(), tokio::io::stdout()).await
}
