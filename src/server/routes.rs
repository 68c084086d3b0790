use crate::server::{handlers, types::AppState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub fn create_router(state: AppState) -> Router {
    let upload_dir = state.store.upload_dir().to_path_buf();
    let results_dir = state.store.results_dir().to_path_buf();
    let body_limit = state.max_upload_bytes;
    let state = Arc::new(state);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/api/model-info", get(handlers::model_info))
        .route("/api/upload", post(handlers::upload_file))
        .route("/api/analyze", post(handlers::analyze))
        .route("/detect", post(handlers::detect))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .nest_service("/static/results", ServeDir::new(results_dir.clone()))
        .nest_service("/results", ServeDir::new(results_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
