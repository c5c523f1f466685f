//! Router construction.

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::{
    admin, grades, holidays, logs, overview, status, stream, students, teachers, timespent, years,
};

pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/overview", get(overview::snapshot))
        .route("/overview/daily", get(overview::daily))
        .route("/teachers", get(teachers::list))
        .route("/teachers/{user_id}", get(teachers::detail))
        .route("/students", get(students::list))
        .route("/students/{user_id}", get(students::detail))
        .route("/years", get(years::list))
        .route("/years/{year}/courses", get(years::year_courses))
        .route("/years/{year}/activity", get(years::year_activity))
        .route("/years/{year}/engagement", get(years::year_engagement))
        .route(
            "/years/{year}/grade-correlation",
            get(years::year_grade_correlation),
        )
        .route(
            "/courses/{course_id}/grade-distribution",
            get(grades::distribution),
        )
        .route("/logs/counts", get(logs::counts))
        .route("/logs/summary", get(logs::summary))
        .route("/time-spent", get(timespent::school_home))
        .route("/holidays/upcoming", get(holidays::upcoming))
        .route("/holidays/{year}", get(holidays::for_year))
        .route("/cache/clear", post(admin::clear_cache))
        .route("/ws/activity/{user_id}", get(stream::activity_ws))
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        TraceLayer::new_for_http(),
        CorsLayer::permissive(),
        CompressionLayer::new(),
        TimeoutLayer::new(Duration::from_secs(60)),
    ))
}
