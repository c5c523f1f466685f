//! Per-course activity summaries and engagement patterns from the log
//! warehouse, scoped to one academic year's course catalog.
//!
//! Warehouse timestamps are UTC; engagement buckets shift to JST in SQL
//! so the hour-of-day and weekday views match the school calendar.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ids::academic_year_range;
use crate::warehouse::{Warehouse, ch_u64, quote_list};

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseActivityRow {
    pub context_id: String,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub unique_students: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub active_days: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub open_count: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub marker_count: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub memo_count: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub hw_memo_count: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub bookmark_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallActivityStats {
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub unique_students: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub active_courses: u64,
    pub avg_activity_hour: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyActivityTrend {
    pub date: NaiveDate,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub unique_students: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCount {
    pub operation_name: String,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseActivitySummary {
    pub academic_year: i32,
    pub date_range: DateRange,
    pub course_activities: Vec<CourseActivityRow>,
    pub overall_stats: Option<OverallActivityStats>,
    pub daily_trends: Vec<DailyActivityTrend>,
    pub top_operations: Vec<OperationCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyActivity {
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub jst_hour: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub unique_students: u64,
}

/// Weekday buckets use ClickHouse numbering, 1 = Monday through 7 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekdayActivity {
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub jst_day_of_week: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub unique_students: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyActivity {
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub month: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub active_students: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub active_courses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngagementPatterns {
    pub academic_year: i32,
    pub hourly: Vec<HourlyActivity>,
    pub weekday: Vec<WeekdayActivity>,
    pub monthly: Vec<MonthlyActivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn or_empty<T: Default, E: std::fmt::Display>(label: &str, result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(query = label, error = %err, "activity query failed, using empty result");
            T::default()
        }
    }
}

fn year_bounds(academic_year: i32) -> DateRange {
    let (start, end) = academic_year_range(academic_year);
    DateRange {
        start: start.format("%Y-%m-%d").to_string(),
        end: end.format("%Y-%m-%d").to_string(),
    }
}

/// The year's courses keyed by warehouse `context_id`, which carries the
/// Moodle course id as a string.
fn context_filter(course_ids: &[i64]) -> String {
    let ids: Vec<String> = course_ids.iter().map(|id| id.to_string()).collect();
    quote_list(&ids)
}

/// Course-level counts, overall stats, daily trends, and the top
/// operations for one academic year. An empty course catalog returns an
/// empty payload without touching the warehouse.
pub async fn course_activity_summary(
    warehouse: &Warehouse,
    academic_year: i32,
    course_ids: &[i64],
) -> CourseActivitySummary {
    let date_range = year_bounds(academic_year);
    if course_ids.is_empty() {
        return CourseActivitySummary {
            academic_year,
            date_range,
            course_activities: Vec::new(),
            overall_stats: None,
            daily_trends: Vec::new(),
            top_operations: Vec::new(),
            error: Some(format!("No courses found for academic year {academic_year}")),
        };
    }

    let contexts = context_filter(course_ids);
    let scope = format!(
        "context_id IN {contexts}
           AND context_id != ''
           AND toDate(timestamp) >= toDate('{start}')
           AND toDate(timestamp) <= toDate('{end}')",
        start = date_range.start,
        end = date_range.end,
    );

    let per_course = format!(
        r#"
        SELECT
            context_id,
            COUNT(DISTINCT actor_account_name) AS unique_students,
            COUNT(DISTINCT _id) AS total_activities,
            COUNT(DISTINCT toDate(timestamp)) AS active_days,
            countIf(operation_name = 'OPEN') AS open_count,
            countIf(operation_name = 'ADD_MARKER') AS marker_count,
            countIf(operation_name = 'ADD_MEMO') AS memo_count,
            countIf(operation_name = 'ADD_HW_MEMO') AS hw_memo_count,
            countIf(operation_name = 'ADD_BOOKMARK') AS bookmark_count
        FROM statements_mv
        WHERE {scope}
        GROUP BY context_id
        ORDER BY total_activities DESC
        "#
    );

    let overall = format!(
        r#"
        SELECT
            COUNT(DISTINCT actor_account_name) AS unique_students,
            COUNT(DISTINCT _id) AS total_activities,
            COUNT(DISTINCT context_id) AS active_courses,
            round(AVG(toHour(timestamp)), 2) AS avg_activity_hour
        FROM statements_mv
        WHERE {scope}
        "#
    );

    let daily = format!(
        r#"
        SELECT
            toDate(timestamp) AS date,
            COUNT(DISTINCT _id) AS total_activities,
            COUNT(DISTINCT actor_account_name) AS unique_students
        FROM statements_mv
        WHERE {scope}
        GROUP BY date
        ORDER BY date ASC
        "#
    );

    let operations = format!(
        r#"
        SELECT operation_name, COUNT(DISTINCT _id) AS count
        FROM statements_mv
        WHERE {scope}
          AND operation_name != ''
        GROUP BY operation_name
        ORDER BY count DESC
        LIMIT 10
        "#
    );

    let course_activities = or_empty("course_activities", warehouse.fetch_all(&per_course).await);
    let overall_stats = or_empty("overall_stats", warehouse.fetch_optional(&overall).await);
    let daily_trends = or_empty("daily_trends", warehouse.fetch_all(&daily).await);
    let top_operations = or_empty("top_operations", warehouse.fetch_all(&operations).await);

    info!(
        academic_year,
        courses = course_activities.len(),
        "course activity summary assembled"
    );
    CourseActivitySummary {
        academic_year,
        date_range,
        course_activities,
        overall_stats,
        daily_trends,
        top_operations,
        error: None,
    }
}

/// Hour-of-day, weekday, and monthly engagement buckets for one academic
/// year's courses.
pub async fn engagement_patterns(
    warehouse: &Warehouse,
    academic_year: i32,
    course_ids: &[i64],
) -> EngagementPatterns {
    if course_ids.is_empty() {
        return EngagementPatterns {
            academic_year,
            hourly: Vec::new(),
            weekday: Vec::new(),
            monthly: Vec::new(),
            error: Some(format!("No courses found for academic year {academic_year}")),
        };
    }

    let date_range = year_bounds(academic_year);
    let contexts = context_filter(course_ids);
    let scope = format!(
        "context_id IN {contexts}
           AND context_id != ''
           AND toDate(timestamp) >= toDate('{start}')
           AND toDate(timestamp) <= toDate('{end}')",
        start = date_range.start,
        end = date_range.end,
    );

    let hourly_sql = format!(
        r#"
        SELECT
            toHour(timestamp + INTERVAL 9 HOUR) AS jst_hour,
            COUNT(DISTINCT _id) AS total_activities,
            COUNT(DISTINCT actor_account_name) AS unique_students
        FROM statements_mv
        WHERE {scope}
        GROUP BY jst_hour
        ORDER BY jst_hour ASC
        "#
    );

    let weekday_sql = format!(
        r#"
        SELECT
            toDayOfWeek(timestamp + INTERVAL 9 HOUR) AS jst_day_of_week,
            COUNT(DISTINCT _id) AS total_activities,
            COUNT(DISTINCT actor_account_name) AS unique_students
        FROM statements_mv
        WHERE {scope}
        GROUP BY jst_day_of_week
        ORDER BY jst_day_of_week ASC
        "#
    );

    let monthly_sql = format!(
        r#"
        SELECT
            toYYYYMM(timestamp) AS month,
            COUNT(DISTINCT _id) AS total_activities,
            COUNT(DISTINCT actor_account_name) AS active_students,
            COUNT(DISTINCT context_id) AS active_courses
        FROM statements_mv
        WHERE {scope}
        GROUP BY month
        ORDER BY month ASC
        "#
    );

    EngagementPatterns {
        academic_year,
        hourly: or_empty("hourly_engagement", warehouse.fetch_all(&hourly_sql).await),
        weekday: or_empty("weekday_engagement", warehouse.fetch_all(&weekday_sql).await),
        monthly: or_empty("monthly_engagement", warehouse.fetch_all(&monthly_sql).await),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_bounds_cover_april_to_march() {
        let range = year_bounds(2023);
        assert_eq!(range.start, "2023-04-01");
        assert_eq!(range.end, "2024-03-31");
    }

    #[test]
    fn context_filter_quotes_course_ids() {
        assert_eq!(context_filter(&[3, 14]), "('3', '14')");
        // The empty sentinel never matches a real context id.
        assert_eq!(context_filter(&[]), "('')");
    }
}
