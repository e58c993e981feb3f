//! Control API plumbing: transport, request server, default routes, client.
//!
//! ```text
//! ┌──────────────┐   unix socket or    ┌────────────────┐
//! │ ControlClient│──── tcp loopback ──▶│ RequestServer  │
//! │  (status)    │   HTTP/1.1 + JSON   │ (axum Router)  │
//! └──────────────┘                     └───────┬────────┘
//!                                              │ routes
//!                                      ┌───────▼────────┐
//!                                      │ RouteRegistrar │
//!                                      └────────────────┘
//! ```

pub mod client;
pub mod routes;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{ControlClient, ControlClientError};
pub use routes::DefaultRoutes;
pub use server::{RequestServer, RunningServer, ServeError, ServerLimits};
pub use transport::{BoundAddress, Endpoint, Listener, TransportError, TransportKind};
pub use types::*;
