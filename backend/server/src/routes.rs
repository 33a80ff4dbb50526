use std::sync::Arc;

use axum::{Json, extract, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::{error::AppError, state::State};

pub async fn ping_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "ok": true, "time": Utc::now().to_rfc3339() })),
    )
}

pub async fn dbcheck_handler(
    extract::State(state): extract::State<Arc<State>>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(e) = state.store.ping().await {
        warn!("Store ping failed: {}", e.as_label());
        return Err(e.into());
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "ok": true, "readiness": state.readiness })),
    ))
}
