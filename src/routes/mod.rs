pub mod analyze;
pub mod history;

use axum::Router;
use std::sync::Arc;

use crate::AppState;
use crate::classifier::Classifier;
use crate::frames::VideoSource;
use crate::services::history::HistoryStore;

/// Build all routes for the API
pub fn build_routes<C, H, S>() -> Router<Arc<AppState<C, H, S>>>
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    Router::new()
        .merge(analyze::routes())
        .merge(history::routes())
}
