//! Teacher list and detail handlers.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::Value;

use crate::cache::TTL_SHORT;
use crate::data::teachers;
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error, db_error};

#[derive(Serialize)]
pub struct TeacherDetailResponse {
    #[serde(flatten)]
    pub teacher: teachers::TeacherDetail,
    pub enrollments: Vec<teachers::CourseEnrollment>,
    pub recent_course_access: Vec<teachers::RecentCourseAccess>,
}

pub(super) async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let value = state
        .cache
        .get_or_compute("teachers:list", TTL_SHORT, || async {
            Ok(serde_json::to_value(
                teachers::list(&state.db.moodle).await?,
            )?)
        })
        .await
        .map_err(|e| cache_error("Teacher list", e))?;
    Ok(Json(value.as_ref().clone()))
}

pub(super) async fn detail(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<TeacherDetailResponse>, ApiError> {
    let moodle = &state.db.moodle;
    let teacher = teachers::detail(moodle, user_id)
        .await
        .map_err(|e| db_error("Teacher detail", e))?
        .ok_or_else(|| ApiError::not_found(format!("teacher {user_id} not found")))?;

    let enrollments = state
        .cache
        .get_or_compute_as(
            &format!("teachers:enrollments:{user_id}"),
            TTL_SHORT,
            || async { teachers::enrollments(moodle, user_id).await },
        )
        .await
        .map_err(|e| cache_error("Teacher enrollments", e))?;
    let recent_course_access = teachers::recent_course_access(moodle, user_id)
        .await
        .map_err(|e| db_error("Teacher course access", e))?;

    Ok(Json(TeacherDetailResponse {
        teacher,
        enrollments,
        recent_course_access,
    }))
}
