pub mod error;
pub mod routes;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use mien_core::MatchEngine;
use mien_vision::VisionHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    /// The matching engine over the similarity store.
    pub engine: MatchEngine,
    /// Handle to the vision inference thread.
    pub vision: VisionHandle,
    /// Daemon start time, for the health probe.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: MatchEngine, vision: VisionHandle) -> Arc<Self> {
        Arc::new(Self { engine, vision, started_at: Instant::now() })
    }
}

/// Build the router: two patient endpoints plus a health probe, with
/// request tracing and a body cap for the base64 image payloads.
pub fn create_app(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/register_patient", post(routes::register_patient))
        .route("/search_patient", post(routes::search_patient))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
