use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{health_check, scan_redirect, ScanState};

pub fn create_redirect_router(state: Arc<ScanState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(scan_redirect))
        .route("/{*path}", get(scan_redirect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
