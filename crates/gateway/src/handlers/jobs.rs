//! Scheduler job trigger handlers
//!
//! Jobs are fired by an external scheduler (cron hitting the endpoint). A
//! shared token guards them; there is no per-user auth on this surface.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use draftflow_engine::NotifySummary;

use crate::AppState;

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let token = headers
        .get("x-jobs-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    !state.config.jobs.token.is_empty() && token == state.config.jobs.token
}

/// Daily planning notification job.
pub async fn notify_planned(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NotifySummary>, (StatusCode, Json<Value>)> {
    if !authorized(&state, &headers) {
        return Err((StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))));
    }

    match state.engine.notify_planned().await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => {
            tracing::error!(error = %e, "planning notification job failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.error_type()})),
            ))
        }
    }
}
