//! School/home reading-time handler.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::TTL_SHORT;
use crate::data::{courses, holidays, ids, timespent};
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error};

#[derive(Deserialize)]
pub struct TimeSpentParams {
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
}

/// `GET /time-spent?start_year=&end_year=`
///
/// Defaults to every academic year with a course catalog.
pub(super) async fn school_home(
    State(state): State<AppState>,
    Query(params): Query<TimeSpentParams>,
) -> Result<Json<Value>, ApiError> {
    if let (Some(start), Some(end)) = (params.start_year, params.end_year)
        && start > end
    {
        return Err(ApiError::invalid_parameter(format!(
            "start_year {start} is after end_year {end}"
        )));
    }

    let key = format!(
        "timespent:{}:{}",
        params.start_year.map_or("all".to_string(), |y| y.to_string()),
        params.end_year.map_or("all".to_string(), |y| y.to_string()),
    );
    let value = state
        .cache
        .get_or_compute(&key, TTL_SHORT, || async {
            let mut years = courses::available_academic_years(&state.db.moodle).await?;
            if let Some(start) = params.start_year {
                years.retain(|&y| y >= start);
            }
            if let Some(end) = params.end_year {
                years.retain(|&y| y <= end);
            }
            // Oldest first so the report reads chronologically.
            years.sort_unstable();

            let holiday_dates = match (years.first(), years.last()) {
                (Some(&first), Some(&last)) => {
                    let (range_start, _) = ids::academic_year_range(first);
                    let (_, range_end) = ids::academic_year_range(last);
                    holidays::dates_between(&state.db.app, range_start, range_end).await?
                }
                _ => Vec::new(),
            };

            let breakdown = timespent::school_home_breakdown(
                &state.db,
                &state.settings,
                &holiday_dates,
                &years,
            )
            .await;
            Ok(serde_json::to_value(breakdown)?)
        })
        .await
        .map_err(|e| cache_error("Time spent", e))?;
    Ok(Json(value.as_ref().clone()))
}
