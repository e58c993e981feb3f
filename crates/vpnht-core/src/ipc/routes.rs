//! Default control routes installed by the shipped binary.
//!
//! Unknown paths get a JSON [`ErrorResponse`] so the control client can
//! report what went wrong.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::{Json, Router};

use super::types::{ErrorResponse, HealthResponse, SessionsResponse};
use crate::collab::{RouteRegistrar, SessionRegistry};

/// `GET /health` and `GET /sessions`.
#[derive(Clone)]
pub struct DefaultRoutes {
    state: Arc<RouteState>,
}

struct RouteState {
    sessions: Arc<dyn SessionRegistry>,
    development: bool,
    started_at: Instant,
}

impl DefaultRoutes {
    pub fn new(sessions: Arc<dyn SessionRegistry>, development: bool) -> Self {
        Self {
            state: Arc::new(RouteState {
                sessions,
                development,
                started_at: Instant::now(),
            }),
        }
    }
}

impl RouteRegistrar for DefaultRoutes {
    fn register(&self, router: Router) -> Router {
        let routes = Router::new()
            .route("/health", get(handle_health))
            .route("/sessions", get(handle_sessions))
            .fallback(handle_not_found)
            .with_state(Arc::clone(&self.state));
        router.merge(routes)
    }
}

async fn handle_health(State(state): State<Arc<RouteState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
        build_profile: crate::build_info::BUILD_PROFILE.to_string(),
        development: state.development,
        uptime_secs: state.started_at.elapsed().as_secs(),
        pid: std::process::id(),
    })
}

async fn handle_sessions(State(state): State<Arc<RouteState>>) -> Json<SessionsResponse> {
    let sessions: Vec<String> = state
        .sessions
        .active_sessions()
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    let total = sessions.len();
    Json(SessionsResponse { sessions, total })
}

async fn handle_not_found(uri: Uri) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("no such endpoint: {}", uri.path()),
        }),
    )
}
