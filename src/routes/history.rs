//! Recent history endpoint (/history)

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use std::sync::Arc;

use crate::AppState;
use crate::classifier::Classifier;
use crate::frames::VideoSource;
use crate::models::HistoryRecord;
use crate::services::error::LogErr;
use crate::services::history::HistoryStore;

pub fn routes<C, H, S>() -> Router<Arc<AppState<C, H, S>>>
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    Router::new().route("/history", get(recent_history::<C, H, S>))
}

/// GET /history - The most recent verdicts, newest first
async fn recent_history<C, H, S>(
    State(state): State<Arc<AppState<C, H, S>>>,
) -> Result<Json<Vec<HistoryRecord>>, StatusCode>
where
    C: Classifier + 'static,
    H: HistoryStore + 'static,
    S: VideoSource + 'static,
{
    let records = state
        .analyzer
        .recent_history()
        .await
        .log_500("[history] Failed to load recent history")?;

    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedClassifier, get, json_body, test_app, tiny_jpeg, upload};
    use tower::ServiceExt;

    #[tokio::test]
    async fn empty_history_is_an_empty_list() {
        let (app, _) = test_app(ScriptedClassifier::scores(&[]));
        let response = app.oneshot(get("/history")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn lists_three_newest_analyses() {
        let (app, _) = test_app(ScriptedClassifier::scores(&[10, 20, 30, 40]));
        for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
            let response = app
                .clone()
                .oneshot(upload("file", name, "image/jpeg", &tiny_jpeg(4, 4)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let body = json_body(app.oneshot(get("/history")).await.unwrap()).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["file_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["d.jpg", "c.jpg", "b.jpg"]);
        assert_eq!(body[0]["confidence"], 40);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = test_app(ScriptedClassifier::scores(&[]));
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
