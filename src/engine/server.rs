// Router assembly: webhook ingest, legacy REST facade, real-time fan-out,
// and a bare health check, behind a permissive CORS layer for the operator
// front end.

use crate::config::Config;
use crate::engine::state::AppState;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build(state: AppState, config: Arc<Config>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .merge(crate::engine::webhook::router())
        .merge(crate::engine::rest::router())
        .merge(crate::engine::realtime::router())
        .with_state((state, config))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}
