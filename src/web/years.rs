//! Per-academic-year analytics handlers: course catalog, activity,
//! engagement, and the grade correlation.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::Value;

use crate::cache::{TTL_COURSE, TTL_DEFAULT, TTL_LONG};
use crate::data::{activity, correlation, courses};
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error};

pub(super) async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let value = state
        .cache
        .get_or_compute("courses:years", TTL_COURSE, || async {
            Ok(serde_json::to_value(
                courses::available_academic_years(&state.db.moodle).await?,
            )?)
        })
        .await
        .map_err(|e| cache_error("Academic years", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn year_courses(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let key = format!("courses:{year}");
    let value = state
        .cache
        .get_or_compute(&key, TTL_COURSE, || async {
            let catalog = courses::courses_by_academic_year(&state.db.moodle, year).await;
            Ok(serde_json::to_value(catalog)?)
        })
        .await
        .map_err(|e| cache_error("Year courses", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn year_activity(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let key = format!("activity:summary:{year}");
    let value = state
        .cache
        .get_or_compute(&key, TTL_DEFAULT, || async {
            let catalog = courses::courses_by_academic_year(&state.db.moodle, year).await;
            let warehouse = state.db.warehouse_for_academic_year(year);
            let summary =
                activity::course_activity_summary(warehouse, year, &catalog.course_ids()).await;
            Ok(serde_json::to_value(summary)?)
        })
        .await
        .map_err(|e| cache_error("Year activity", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn year_engagement(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let key = format!("activity:engagement:{year}");
    let value = state
        .cache
        .get_or_compute(&key, TTL_DEFAULT, || async {
            let catalog = courses::courses_by_academic_year(&state.db.moodle, year).await;
            let warehouse = state.db.warehouse_for_academic_year(year);
            let patterns =
                activity::engagement_patterns(warehouse, year, &catalog.course_ids()).await;
            Ok(serde_json::to_value(patterns)?)
        })
        .await
        .map_err(|e| cache_error("Year engagement", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn year_grade_correlation(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let key = format!("correlation:{year}");
    let value = state
        .cache
        .get_or_compute(&key, TTL_LONG, || async {
            let report = correlation::grade_time_correlation(
                &state.db,
                &state.db.analysis,
                &state.settings,
                year,
            )
            .await;
            Ok(serde_json::to_value(report)?)
        })
        .await
        .map_err(|e| cache_error("Grade correlation", e))?;
    Ok(Json(value.as_ref().clone()))
}
