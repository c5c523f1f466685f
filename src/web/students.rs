//! Student list and detail handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::data::students;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

#[derive(Deserialize)]
pub struct StudentListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

pub(super) async fn list(
    State(state): State<AppState>,
    Query(params): Query<StudentListParams>,
) -> Result<Json<students::StudentPage>, ApiError> {
    let page = students::page(
        &state.db.moodle,
        &state.db.warehouse,
        params.search.as_deref().filter(|s| !s.trim().is_empty()),
        params.page,
        params.page_size,
    )
    .await
    .map_err(|e| db_error("Student list", e))?;
    Ok(Json(page))
}

pub(super) async fn detail(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<students::StudentDetail>, ApiError> {
    let detail = students::detail(&state.db.moodle, &state.db.warehouse, &state.cache, user_id)
        .await
        .map_err(|e| db_error("Student detail", e))?
        .ok_or_else(|| ApiError::not_found(format!("student {user_id} not found")))?;
    Ok(Json(detail))
}
