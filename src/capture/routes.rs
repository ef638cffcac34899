use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::CaptureConfig;
use crate::session::SessionStore;
use crate::storage::Storage;

use super::handlers::{capture, health_check, CaptureState};

pub fn create_capture_router(
    storage: Arc<dyn Storage>,
    sessions: Arc<dyn SessionStore>,
    config: CaptureConfig,
) -> Router {
    let state = Arc::new(CaptureState {
        storage,
        sessions,
        config,
    });

    // Tracking scripts post from tenant origins with credentials
    Router::new()
        .route("/", get(health_check))
        .route("/capture", post(capture))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}
