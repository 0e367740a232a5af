//! Analysis endpoints (/analyze, /analysis/state)

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    routing::{get, post},
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::analysis::{AnalysisError, AnalysisOutcome, AnalysisState, CancelToken};
use crate::classifier::Classifier;
use crate::constants::FILE_FIELD;
use crate::frames::VideoSource;
use crate::models::{MediaInput, MediaKind};
use crate::services::error::{LogErr, analysis_status};
use crate::services::history::HistoryStore;

pub fn routes<C, H, S>() -> Router<Arc<AppState<C, H, S>>>
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    Router::new()
        .route("/analyze", post(analyze::<C, H, S>))
        .route("/analysis/state", get(analysis_state::<C, H, S>))
}

struct Upload {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

/// Take the first `file` field, skipping anything else in the form.
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Upload>, StatusCode> {
    while let Some(field) = multipart
        .next_field()
        .await
        .log_status("[analyze] Multipart field error", StatusCode::BAD_REQUEST)?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .log_status("[analyze] Failed to read upload", StatusCode::BAD_REQUEST)?;

        return Ok(Some(Upload {
            file_name,
            content_type,
            data,
        }));
    }
    Ok(None)
}

/// POST /analyze - Analyze one uploaded image or video
/// Accepts multipart form data with a single "file" field.
async fn analyze<C, H, S>(
    State(state): State<Arc<AppState<C, H, S>>>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisOutcome>, StatusCode>
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    let upload = read_upload(&mut multipart)
        .await?
        .filter(|u| !u.data.is_empty())
        .ok_or(AnalysisError::NoInput)
        .log_status("[analyze] Rejected request", StatusCode::BAD_REQUEST)?;

    let kind = MediaKind::detect(upload.content_type.as_deref(), &upload.file_name, &upload.data)
        .ok_or_else(|| format!("cannot tell media kind of {:?}", upload.file_name))
        .log_status("[analyze] Unsupported upload", StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

    let mut input = MediaInput::new(upload.file_name, kind, upload.data);
    if let Some(content_type) = upload
        .content_type
        .filter(|ct| ct.starts_with("image/") || ct.starts_with("video/"))
    {
        input = input.with_content_type(content_type);
    }

    let outcome = state
        .analyzer
        .analyze(input, &CancelToken::new())
        .await
        .log_with("[analyze] Analysis failed", analysis_status)?;

    Ok(Json(outcome))
}

#[derive(Serialize)]
struct StateResponse {
    state: AnalysisState,
}

/// GET /analysis/state - Current orchestrator state
async fn analysis_state<C, H, S>(
    State(state): State<Arc<AppState<C, H, S>>>,
) -> Json<StateResponse>
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    Json(StateResponse {
        state: state.analyzer.current_state(),
    })
}
