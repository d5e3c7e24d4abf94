//! Front-tier client for the processing tier.
//!
//! One TCP connection per call: write a request frame, read the response
//! frame, close. Any failure is reported as a [`TransportError`] and callers
//! treat it as "enrichment unavailable".

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;

use crate::protocol::{FrameCodec, FrameError, TaskRequest, TaskResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ConnectionError: {0}")]
    Connection(String),

    #[error("TimeoutError: no response within {0:?}")]
    Timeout(Duration),

    #[error("ProtocolError: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Connection(_) => "ConnectionError",
            TransportError::Timeout(_) => "TimeoutError",
            TransportError::Protocol(_) => "ProtocolError",
        }
    }
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => TransportError::Connection(io.to_string()),
            FrameError::Closed => {
                TransportError::Protocol("connection closed before a response arrived".to_string())
            }
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// Send one request to `host:port` and wait for its response.
pub async fn call(
    host: &str,
    port: u16,
    request: &TaskRequest,
    timeout: Duration,
) -> Result<TaskResponse, TransportError> {
    call_with_codec(host, port, request, timeout, FrameCodec::default()).await
}

async fn call_with_codec(
    host: &str,
    port: u16,
    request: &TaskRequest,
    timeout: Duration,
    codec: FrameCodec,
) -> Result<TaskResponse, TransportError> {
    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(TransportError::Connection(format!(
                "cannot connect to {}:{}: {}",
                host, port, e
            )))
        }
        Err(_) => {
            return Err(TransportError::Connection(format!(
                "connect to {}:{} timed out after {:?}",
                host, port, timeout
            )))
        }
    };

    let exchange = async {
        codec.write_message(&mut stream, request).await?;
        codec.read_message::<_, TaskResponse>(&mut stream).await
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

/// Reusable handle on one processing server.
#[derive(Debug, Clone)]
pub struct ProcessingClient {
    host: String,
    port: u16,
    timeout: Duration,
    codec: FrameCodec,
}

impl ProcessingClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            codec: FrameCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn call(&self, request: &TaskRequest) -> Result<TaskResponse, TransportError> {
        self.call_with_timeout(request, self.timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        request: &TaskRequest,
        timeout: Duration,
    ) -> Result<TaskResponse, TransportError> {
        tracing::debug!(
            "Sending '{}' task for {} to {}:{}",
            request.task,
            request.url,
            self.host,
            self.port
        );
        call_with_codec(&self.host, self.port, request, timeout, self.codec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskKind;
    use serde_json::Value;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let port = unused_port().await;
        let request = TaskRequest::new(TaskKind::Test, "https://example.com");
        let err = call("127.0.0.1", port, &request, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ConnectionError");
    }

    #[tokio::test]
    async fn test_round_trip_against_stub_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let codec = FrameCodec::default();
            let request: TaskRequest = codec.read_message(&mut socket).await.unwrap();
            let mut result = serde_json::Map::new();
            result.insert("echo".into(), Value::String(request.url));
            codec
                .write_message(&mut socket, &TaskResponse::success(result))
                .await
                .unwrap();
        });

        let client = ProcessingClient::new("127.0.0.1", port, Duration::from_secs(5));
        let response = client
            .call(&TaskRequest::new(TaskKind::Test, "https://example.com"))
            .await
            .unwrap();
        match response {
            TaskResponse::Success { result } => assert_eq!(result["echo"], "https://example.com"),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let err = call(
            "127.0.0.1",
            port,
            &TaskRequest::new(TaskKind::Test, "https://example.com"),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "TimeoutError");
        server.abort();
    }

    #[tokio::test]
    async fn test_garbage_response_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let codec = FrameCodec::default();
            let _: Value = codec.read_message(&mut socket).await.unwrap();
            socket.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();
        });

        let err = call(
            "127.0.0.1",
            port,
            &TaskRequest::new(TaskKind::Test, "https://example.com"),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "ProtocolError");
    }
}
