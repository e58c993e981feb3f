//! Request server: serves the control API router over the bound endpoint.
//!
//! Each accepted connection is driven by hyper's HTTP/1.1 connection on its
//! own task. The accept loop runs on a dedicated task so it never blocks the
//! orchestrator, and owns every connection task: aborting the accept loop
//! force-closes whatever is still open.

use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

use vpnht_config::ServerConfig;

use super::transport::{Listener, Stream};
use crate::outcome::{BestEffort, panic_message};

/// Smallest read buffer hyper accepts.
const MIN_READ_BUF: usize = 8192;

/// Headroom over `max_header_bytes` before the connection read buffer is full.
const HEADER_SLACK: usize = 4096;

/// Errors that end the serve loop. Fatal while the service is healthy.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("serve loop exited without a shutdown request")]
    Stopped,

    #[error("serve task panicked: {0}")]
    Panicked(String),

    #[error("serve task was cancelled")]
    Cancelled,
}

/// Resource limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    /// Deadline for a client to finish sending request headers.
    pub read_timeout: Duration,
    /// Deadline for the handler to produce a response.
    pub write_timeout: Duration,
    /// Upper bound on the request line plus all header lines.
    pub max_header_bytes: usize,
}

impl From<&ServerConfig> for ServerLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            max_header_bytes: config.max_header_bytes,
        }
    }
}

/// The control API server, not yet serving.
pub struct RequestServer {
    router: Router,
    limits: ServerLimits,
}

impl RequestServer {
    /// Wrap `router` with the response deadline and header-size limit.
    pub fn new(router: Router, limits: ServerLimits) -> Self {
        let router = router
            .layer(middleware::from_fn_with_state(
                limits.max_header_bytes,
                limit_header_bytes,
            ))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                limits.write_timeout,
            ));
        Self { router, limits }
    }

    /// The wrapped router, for in-process testing without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Start accepting on `listener` in the background.
    pub fn start(self, listener: Listener) -> RunningServer {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(listener, self.router, self.limits, cancel.clone()));
        RunningServer { task, cancel }
    }
}

/// Handle to the serving task.
pub struct RunningServer {
    task: JoinHandle<Result<(), ServeError>>,
    cancel: CancellationToken,
}

impl RunningServer {
    /// Resolves only if the serve loop ends on its own.
    ///
    /// Cancel-safe: dropping this future leaves the server running.
    pub async fn failed(&mut self) -> ServeError {
        match (&mut self.task).await {
            Ok(Ok(())) => ServeError::Stopped,
            Ok(Err(e)) => e,
            Err(e) if e.is_panic() => ServeError::Panicked(panic_message(e.into_panic())),
            Err(_) => ServeError::Cancelled,
        }
    }

    /// Stop accepting, let in-flight requests finish within `window`, then
    /// force-close whatever is left.
    pub async fn shutdown(self, window: Duration) -> BestEffort {
        self.cancel.cancel();
        let mut task = self.task;

        match tokio::time::timeout(window, &mut task).await {
            Ok(Ok(Ok(()))) => {
                info!("Request server stopped");
                BestEffort::Done
            }
            // Listener-closed errors are expected once shutdown has started.
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "Serve loop ended with error during shutdown");
                BestEffort::recovered(e.to_string())
            }
            Ok(Err(e)) => {
                let reason = if e.is_panic() {
                    format!("serve task panicked: {}", panic_message(e.into_panic()))
                } else {
                    "serve task was cancelled".to_string()
                };
                warn!(reason = %reason, "Request server shutdown recovered");
                BestEffort::recovered(reason)
            }
            Err(_) => {
                task.abort();
                let _ = task.await;
                warn!(
                    window_ms = window.as_millis() as u64,
                    "Connections still open after shutdown window, forced close"
                );
                BestEffort::recovered("forced close after shutdown window")
            }
        }
    }
}

async fn serve(
    listener: Listener,
    router: Router,
    limits: ServerLimits,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout)
        .max_buf_size(read_buf_size(limits.max_header_bytes));

    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    info!("Request server accepting connections");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok(Stream::Tcp(stream)) => {
                        spawn_connection(stream, &builder, &router, &graceful, &mut connections);
                    }
                    #[cfg(unix)]
                    Ok(Stream::Unix(stream)) => {
                        spawn_connection(stream, &builder, &router, &graceful, &mut connections);
                    }
                    Err(e) if is_transient(&e) => {
                        debug!(error = %e, "Transient accept error");
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        return Err(ServeError::Accept(e));
                    }
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(panic = %panic_message(e.into_panic()), "Connection task panicked");
                    }
                }
            }
        }
    }

    drop(listener);
    debug!("Draining connections");
    graceful.shutdown().await;
    while connections.join_next().await.is_some() {}
    Ok(())
}

fn spawn_connection<I>(
    io: I,
    builder: &http1::Builder,
    router: &Router,
    graceful: &GracefulShutdown,
    connections: &mut JoinSet<()>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = TowerToHyperService::new(router.clone());
    let conn = builder.serve_connection(TokioIo::new(io), service);
    let watched = graceful.watch(conn);
    connections.spawn(async move {
        if let Err(e) = watched.await {
            debug!(error = %e, "Connection closed with error");
        }
    });
}

/// Bound on what hyper buffers while reading a request head. Oversized heads
/// are cut off here; the middleware answers the exact limit with 431.
fn read_buf_size(max_header_bytes: usize) -> usize {
    max_header_bytes.saturating_add(HEADER_SLACK).max(MIN_READ_BUF)
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

/// Request line plus header lines, counted the way they appear on the wire.
fn header_bytes(request: &Request) -> usize {
    let request_line = request.method().as_str().len()
        + request
            .uri()
            .path_and_query()
            .map_or(1, |pq| pq.as_str().len())
        + "HTTP/1.1".len()
        + 4;
    let headers: usize = request
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum();
    request_line + headers
}

async fn limit_header_bytes(
    State(max_header_bytes): State<usize>,
    request: Request,
    next: Next,
) -> Response {
    let size = header_bytes(&request);
    if size > max_header_bytes {
        warn!(size, limit = max_header_bytes, path = %request.uri().path(), "Rejected oversized request headers");
        return StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE.into_response();
    }
    next.run(request).await
}
