pub mod analysis;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod domain;
pub mod frames;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod verdict;

#[cfg(test)]
pub(crate) mod testing;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use analysis::Analyzer;
use classifier::{Classifier, HttpClassifier};
use frames::{FfmpegSource, VideoSource};
use services::history::{HistoryBackend, HistoryStore};

/// Shared state behind every route
pub struct AppState<C = HttpClassifier, H = HistoryBackend, S = FfmpegSource> {
    pub analyzer: Arc<Analyzer<C, H, S>>,
    pub max_upload_bytes: usize,
}

/// Assemble the HTTP service around an analyzer.
pub fn build_app<C, H, S>(state: Arc<AppState<C, H, S>>) -> Router
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .merge(routes::build_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
