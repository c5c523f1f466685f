//! AJAX grade-distribution handler.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::TTL_DEFAULT;
use crate::data::{courses, grades};
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error};

#[derive(Deserialize)]
pub struct GradeDistributionParams {
    pub year: i32,
}

/// `GET /courses/{course_id}/grade-distribution?year=`
///
/// A course outside the year's catalog (or any query failure) degrades to
/// an empty payload carrying an error string, matching the dashboard's
/// expectations.
pub(super) async fn distribution(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    Query(params): Query<GradeDistributionParams>,
) -> Result<Json<Value>, ApiError> {
    let year = params.year;
    let course_num: i64 = course_id
        .parse()
        .map_err(|_| ApiError::invalid_parameter(format!("invalid course id '{course_id}'")))?;

    let key = format!("grades:distribution:{year}:{course_id}");
    let value = state
        .cache
        .get_or_compute(&key, TTL_DEFAULT, || async {
            let catalog = courses::courses_by_academic_year(&state.db.moodle, year).await;
            if !catalog.course_ids().contains(&course_num) {
                let payload = grades::GradeDistribution::empty(
                    &course_id,
                    year,
                    format!("Course {course_id} not found in academic year {year}"),
                );
                return Ok(serde_json::to_value(payload)?);
            }

            let students = courses::student_ids_for_year(&state.db.moodle, &catalog).await?;
            let non_students =
                courses::non_student_ids_for_year(&state.db.moodle, &catalog).await?;
            let filter = courses::optimal_student_filter(students, non_students);

            let distribution =
                grades::course_grade_distribution(&state.db.analysis, &course_id, year, &filter)
                    .await;
            Ok(serde_json::to_value(distribution)?)
        })
        .await
        .map_err(|e| cache_error("Grade distribution", e))?;
    Ok(Json(value.as_ref().clone()))
}
