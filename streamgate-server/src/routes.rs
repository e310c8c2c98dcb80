use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/streams/{key}/index.m3u8", get(handlers::playlist_handler))
        .route("/streams/{key}/stop", post(handlers::stop_handler))
        .route("/streams/{key}/{file}", get(handlers::segment_handler))
        // Players are usually served from another origin.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
