//! Warehouse log volume handlers.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::TTL_LOG;
use crate::data::logs::{self, LogView};
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error};

#[derive(Deserialize)]
pub struct LogCountParams {
    #[serde(default)]
    pub view: Option<LogView>,
}

pub(super) async fn counts(
    State(state): State<AppState>,
    Query(params): Query<LogCountParams>,
) -> Result<Json<Value>, ApiError> {
    let view = params.view.unwrap_or(LogView::Month);
    let key = match view {
        LogView::Month => "logs:counts:month",
        LogView::Year => "logs:counts:year",
    };
    let value = state
        .cache
        .get_or_compute(key, TTL_LOG, || async {
            Ok(serde_json::to_value(
                logs::counts_by_period(&state.db, view).await,
            )?)
        })
        .await
        .map_err(|e| cache_error("Log counts", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn summary(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let value = state
        .cache
        .get_or_compute("logs:summary", TTL_LOG, || async {
            Ok(serde_json::to_value(logs::summary_stats(&state.db).await)?)
        })
        .await
        .map_err(|e| cache_error("Log summary", e))?;
    Ok(Json(value.as_ref().clone()))
}
