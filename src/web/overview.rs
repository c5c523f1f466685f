//! Dashboard overview handlers.

use axum::Json;
use axum::extract::State;
use serde_json::Value;

use crate::cache::TTL_SHORT;
use crate::data::overview;
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error};

pub(super) async fn snapshot(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let value = state
        .cache
        .get_or_compute("overview:snapshot", TTL_SHORT, || async {
            Ok(serde_json::to_value(overview::snapshot(&state).await)?)
        })
        .await
        .map_err(|e| cache_error("Overview snapshot", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn daily(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let value = state
        .cache
        .get_or_compute("overview:daily", TTL_SHORT, || async {
            Ok(serde_json::to_value(overview::daily(&state).await)?)
        })
        .await
        .map_err(|e| cache_error("Overview daily", e))?;
    Ok(Json(value.as_ref().clone()))
}
