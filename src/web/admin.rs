//! Cache administration.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct CacheClearParams {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// `POST /cache/clear[?prefix=]`
pub(super) async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<CacheClearParams>,
) -> Json<Value> {
    let cleared = match params.prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => state.cache.clear_prefix(prefix),
        _ => state.cache.clear_all(),
    };
    info!(cleared, prefix = ?params.prefix, "cache cleared via API");
    Json(json!({ "cleared": cleared }))
}
