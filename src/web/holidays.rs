//! Holiday lookup handlers.

use axum::Json;
use axum::extract::{Path, State};

use crate::data::holidays;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

const UPCOMING_LIMIT: i64 = 5;

pub(super) async fn for_year(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> Result<Json<Vec<holidays::Holiday>>, ApiError> {
    let list = holidays::for_year(&state.db.app, year)
        .await
        .map_err(|e| db_error("Holiday lookup", e))?;
    Ok(Json(list))
}

pub(super) async fn upcoming(
    State(state): State<AppState>,
) -> Result<Json<Vec<holidays::Holiday>>, ApiError> {
    let list = holidays::upcoming(&state.db.app, UPCOMING_LIMIT)
        .await
        .map_err(|e| db_error("Upcoming holidays", e))?;
    Ok(Json(list))
}
