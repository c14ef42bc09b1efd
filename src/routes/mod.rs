//! Route modules for Tus Server

pub mod health;
pub mod tus;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::tus::headers::EXPOSED_HEADERS;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    // Browser clients must be able to read the tus response headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(EXPOSED_HEADERS);

    Router::new()
        .route("/health", get(health::health_check))
        .merge(tus::router(&state.config().tus.url_path))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
