//! JSON bodies served by the default control routes.
//!
//! Shared by the routes (server side) and [`ControlClient`](super::ControlClient).

use serde::{Deserialize, Serialize};

/// Service health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
    pub development: bool,
    pub uptime_secs: u64,
    pub pid: u32,
}

/// Active session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<String>,
    pub total: usize,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
