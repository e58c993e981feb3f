//! Control client: talks to a running service over its endpoint.
//!
//! Used by `vpnht-service status` and by the integration tests. Speaks
//! HTTP/1.1 with `hyper` over either transport.

use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use super::transport::BoundAddress;
use super::types::*;

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum ControlClientError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("service is not running (no socket at {0})")]
    NotRunning(String),

    #[error("domain sockets are not supported on this platform")]
    Unsupported,

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("service returned error: {0}")]
    Service(String),
}

/// Client for the control API of a running service.
pub struct ControlClient {
    address: BoundAddress,
}

impl ControlClient {
    pub fn new(address: BoundAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &BoundAddress {
        &self.address
    }

    /// Health check: is the service running and responsive?
    pub async fn health(&self) -> Result<HealthResponse, ControlClientError> {
        let body = self.get("/health").await?;
        serde_json::from_slice(&body)
            .map_err(|e| ControlClientError::Parse(format!("health: {e}")))
    }

    /// Names of the sessions the service currently holds.
    pub async fn sessions(&self) -> Result<SessionsResponse, ControlClientError> {
        let body = self.get("/sessions").await?;
        serde_json::from_slice(&body)
            .map_err(|e| ControlClientError::Parse(format!("sessions: {e}")))
    }

    /// Send a `GET` and return the response body.
    pub async fn get(&self, path: &str) -> Result<Bytes, ControlClientError> {
        let endpoint = self.address.to_string();
        let connect_err = |source| ControlClientError::Connect {
            endpoint: endpoint.clone(),
            source,
        };

        match &self.address {
            #[cfg(unix)]
            BoundAddress::DomainSocket(path_on_disk) => {
                if !path_on_disk.exists() {
                    return Err(ControlClientError::NotRunning(
                        path_on_disk.display().to_string(),
                    ));
                }
                let stream = tokio::net::UnixStream::connect(path_on_disk)
                    .await
                    .map_err(connect_err)?;
                send_get(stream, path).await
            }
            #[cfg(not(unix))]
            BoundAddress::DomainSocket(_) => Err(ControlClientError::Unsupported),
            BoundAddress::LoopbackTcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(connect_err)?;
                send_get(stream, path).await
            }
        }
    }
}

async fn send_get<S>(stream: S, path: &str) -> Result<Bytes, ControlClientError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) =
        hyper::client::conn::http1::handshake::<_, http_body_util::Empty<Bytes>>(TokioIo::new(
            stream,
        ))
        .await
        .map_err(|e| ControlClientError::Request(format!("HTTP handshake failed: {e}")))?;

    // Drive the connection in the background
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "Control connection error");
        }
    });

    debug!(path, "Control request");

    let req = hyper::Request::builder()
        .method(hyper::Method::GET)
        .uri(path)
        .header("host", "localhost")
        .body(http_body_util::Empty::new())
        .map_err(|e| ControlClientError::Request(format!("failed to build request: {e}")))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ControlClientError::Request(format!("request failed: {e}")))?;

    let status = resp.status();
    let body = http_body_util::BodyExt::collect(resp.into_body())
        .await
        .map_err(|e| ControlClientError::Request(format!("failed to read response body: {e}")))?
        .to_bytes();

    if !status.is_success() {
        if let Ok(err) = serde_json::from_slice::<ErrorResponse>(&body) {
            return Err(ControlClientError::Service(err.error));
        }
        return Err(ControlClientError::Request(format!(
            "unexpected status: {status}"
        )));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::Router;
    use axum::routing::get;

    use crate::ipc::server::{RequestServer, ServerLimits};
    use crate::ipc::transport::{self, TransportKind};

    fn limits() -> ServerLimits {
        ServerLimits {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            max_header_bytes: 4096,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_socket_is_not_running() {
        let client = ControlClient::new(BoundAddress::DomainSocket(
            "/tmp/vpnht-test-nonexistent.sock".into(),
        ));
        let result = client.health().await;
        assert!(matches!(result, Err(ControlClientError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_refused_tcp_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ControlClient::new(BoundAddress::LoopbackTcp(addr));
        let result = client.get("/health").await;
        assert!(matches!(result, Err(ControlClientError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let kind = TransportKind::LoopbackTcp {
            addr: "127.0.0.1:0".parse().unwrap(),
        };
        let (listener, endpoint) = transport::prepare(&kind).await.unwrap();
        let router = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route(
                "/broken",
                get(|| async {
                    (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        axum::Json(ErrorResponse {
                            error: "tunnel down".to_string(),
                        }),
                    )
                }),
            );
        let server = RequestServer::new(router, limits()).start(listener);

        let client = ControlClient::new(endpoint.address().clone());
        let body = client.get("/ok").await.unwrap();
        assert_eq!(&body[..], b"fine");

        match client.get("/broken").await {
            Err(ControlClientError::Service(msg)) => assert_eq!(msg, "tunnel down"),
            other => panic!("expected service error, got {other:?}"),
        }

        assert!(server.shutdown(Duration::from_secs(1)).await.is_done());
    }
}
