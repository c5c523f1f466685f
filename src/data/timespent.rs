//! Reading-time estimates from the log warehouse.
//!
//! Time spent is inferred from gaps between consecutive statements per
//! actor: gaps above the session ceiling contribute nothing, the rest are
//! capped at the per-activity ceiling. The school/home split classifies
//! each statement by its JST wall-clock minute against the configured
//! school window, weekdays only, holidays excluded.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ids::{academic_year_range, extract_student_id};
use crate::db::Databases;
use crate::state::AnalyticsSettings;
use crate::warehouse::{Warehouse, ch_u64, quote_list};

#[derive(Debug, Clone, Deserialize)]
pub struct SchoolHomeRow {
    pub actor_account_name: String,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub month: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub school_time_flag: u64,
    pub time_spent_hours: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TimeSplit {
    pub school_hours: f64,
    pub home_hours: f64,
    pub total_hours: f64,
    pub school_percentage: f64,
    pub home_percentage: f64,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthTimeSpent {
    pub month: String,
    #[serde(flatten)]
    pub split: TimeSplit,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearTimeSpent {
    pub academic_year: i32,
    #[serde(flatten)]
    pub split: TimeSplit,
    pub monthly: Vec<MonthTimeSpent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchoolHomeSummary {
    pub total_school_hours: f64,
    pub total_home_hours: f64,
    pub total_hours: f64,
    pub unique_students: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchoolHomeTimeSpent {
    pub years: Vec<YearTimeSpent>,
    pub summary: SchoolHomeSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudentTimeRow {
    pub actor_account_name: String,
    pub minutes_spent: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StudentTimeSpent {
    pub total_minutes: f64,
    pub active_days: usize,
    pub avg_minutes_per_day: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Innermost per-statement read_seconds, windowed per actor in timestamp
/// order.
fn read_seconds_sql(scope: &str, settings: &AnalyticsSettings) -> String {
    format!(
        r#"
        SELECT
            actor_account_name,
            timestamp,
            CASE
                WHEN time_diff <= {max_session}
                THEN greatest(0, least({max_activity}, time_diff))
                ELSE 0
            END AS read_seconds
        FROM (
            SELECT
                actor_account_name,
                timestamp,
                dateDiff('second', timestamp, leadInFrame(timestamp) OVER (
                    PARTITION BY actor_account_name
                    ORDER BY timestamp
                    ROWS BETWEEN UNBOUNDED PRECEDING AND UNBOUNDED FOLLOWING
                )) AS time_diff
            FROM statements_mv
            WHERE {scope}
        )
        "#,
        max_session = settings.max_session_duration,
        max_activity = settings.max_activity_duration,
    )
}

fn school_home_sql(
    settings: &AnalyticsSettings,
    holidays: &[String],
    start: &str,
    end: &str,
) -> String {
    let scope = format!(
        "actor_name_role = 'student'
               AND actor_account_name != ''
               AND toDate(timestamp) >= toDate('{start}')
               AND toDate(timestamp) <= toDate('{end}')"
    );
    let inner = read_seconds_sql(&scope, settings);
    format!(
        r#"
        SELECT
            actor_account_name,
            toYYYYMM(jst_ts) AS month,
            school_time_flag,
            round(sum(read_seconds) / 3600, 4) AS time_spent_hours
        FROM (
            SELECT
                actor_account_name,
                jst_ts,
                read_seconds,
                multiIf(
                    toDayOfWeek(jst_ts) <= 5
                        AND toString(toDate(jst_ts)) NOT IN {holidays}
                        AND (toHour(jst_ts) * 60 + toMinute(jst_ts)) >= {school_start}
                        AND (toHour(jst_ts) * 60 + toMinute(jst_ts)) < {school_end},
                    1, 0
                ) AS school_time_flag
            FROM (
                SELECT actor_account_name, addHours(timestamp, 9) AS jst_ts, read_seconds
                FROM ({inner})
            )
        )
        GROUP BY actor_account_name, month, school_time_flag
        HAVING time_spent_hours > 0
        ORDER BY month ASC
        "#,
        holidays = quote_list(holidays),
        school_start = settings.school_start_minutes,
        school_end = settings.school_end_minutes,
    )
}

fn split_from(school: f64, home: f64, students: &HashSet<String>) -> TimeSplit {
    let total = school + home;
    let (school_pct, home_pct) = if total > 0.0 {
        (round1(school / total * 100.0), round1(home / total * 100.0))
    } else {
        (0.0, 0.0)
    };
    TimeSplit {
        school_hours: round2(school),
        home_hours: round2(home),
        total_hours: round2(total),
        school_percentage: school_pct,
        home_percentage: home_pct,
        student_count: students.len(),
    }
}

/// Fold one year's warehouse rows into the yearly split plus per-month
/// splits. Actors that do not resolve to a student id are skipped.
pub fn aggregate_year(academic_year: i32, rows: &[SchoolHomeRow]) -> YearTimeSpent {
    let mut year_school = 0.0;
    let mut year_home = 0.0;
    let mut year_students: HashSet<String> = HashSet::new();
    let mut months: BTreeMap<u64, (f64, f64, HashSet<String>)> = BTreeMap::new();

    for row in rows {
        let Some(student_id) = extract_student_id(&row.actor_account_name) else {
            continue;
        };
        let entry = months.entry(row.month).or_default();
        if row.school_time_flag == 1 {
            year_school += row.time_spent_hours;
            entry.0 += row.time_spent_hours;
        } else {
            year_home += row.time_spent_hours;
            entry.1 += row.time_spent_hours;
        }
        entry.2.insert(student_id.to_string());
        year_students.insert(student_id.to_string());
    }

    let monthly = months
        .into_iter()
        .map(|(month, (school, home, students))| MonthTimeSpent {
            month: format!("{:04}-{:02}", month / 100, month % 100),
            split: split_from(school, home, &students),
        })
        .collect();

    YearTimeSpent {
        academic_year,
        split: split_from(year_school, year_home, &year_students),
        monthly,
        error: None,
    }
}

/// School/home reading-time breakdown for the requested academic years,
/// each routed to its own warehouse. A failing year degrades to an empty
/// entry instead of failing the whole report.
pub async fn school_home_breakdown(
    db: &Databases,
    settings: &AnalyticsSettings,
    holidays: &[String],
    academic_years: &[i32],
) -> SchoolHomeTimeSpent {
    let mut years = Vec::with_capacity(academic_years.len());
    let mut all_students: HashSet<String> = HashSet::new();
    let mut total_school = 0.0;
    let mut total_home = 0.0;

    for &year in academic_years {
        let (start, end) = academic_year_range(year);
        let sql = school_home_sql(
            settings,
            holidays,
            &start.format("%Y-%m-%d").to_string(),
            &end.format("%Y-%m-%d").to_string(),
        );
        let warehouse = db.warehouse_for_academic_year(year);
        let rows: Vec<SchoolHomeRow> = match warehouse.fetch_all(&sql).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(academic_year = year, warehouse = warehouse.name(), error = %err,
                      "school/home time query failed");
                years.push(YearTimeSpent {
                    academic_year: year,
                    split: TimeSplit::default(),
                    monthly: Vec::new(),
                    error: Some(err.to_string()),
                });
                continue;
            }
        };

        for row in &rows {
            if let Some(student_id) = extract_student_id(&row.actor_account_name) {
                all_students.insert(student_id.to_string());
            }
        }
        let year_entry = aggregate_year(year, &rows);
        total_school += year_entry.split.school_hours;
        total_home += year_entry.split.home_hours;
        years.push(year_entry);
    }

    info!(
        years = years.len(),
        students = all_students.len(),
        "school/home breakdown assembled"
    );
    SchoolHomeTimeSpent {
        summary: SchoolHomeSummary {
            total_school_hours: round2(total_school),
            total_home_hours: round2(total_home),
            total_hours: round2(total_school + total_home),
            unique_students: all_students.len(),
        },
        years,
    }
}

/// Actor name patterns a Moodle user id shows up under in the warehouse.
fn actor_patterns(student_ids: &[String]) -> String {
    let clauses: Vec<String> = student_ids
        .iter()
        .map(|id| {
            let escaped = crate::warehouse::escape(id);
            format!(
                "(actor_account_name LIKE '{escaped}@%' \
                 OR actor_account_name LIKE 'Learner:{escaped}' \
                 OR actor_account_name LIKE '{escaped}')"
            )
        })
        .collect();
    format!("({})", clauses.join(" OR "))
}

/// Per-day reading minutes for the given students, folded into per-student
/// totals. Used by the grade correlation pipeline.
pub async fn time_spent_for_students(
    warehouse: &Warehouse,
    settings: &AnalyticsSettings,
    student_ids: &[String],
    start: &str,
    end: &str,
) -> anyhow::Result<BTreeMap<String, StudentTimeSpent>> {
    if student_ids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let scope = format!(
        "actor_name_role = 'student'
               AND {patterns}
               AND toDate(timestamp) >= toDate('{start}')
               AND toDate(timestamp) <= toDate('{end}')",
        patterns = actor_patterns(student_ids),
    );
    let inner = read_seconds_sql(&scope, settings);
    let sql = format!(
        r#"
        SELECT
            actor_account_name,
            round(sum(read_seconds) / 60, 2) AS minutes_spent
        FROM ({inner})
        GROUP BY actor_account_name, toDate(timestamp)
        HAVING minutes_spent > 0
        "#
    );

    let rows: Vec<StudentTimeRow> = warehouse.fetch_all(&sql).await?;
    let mut totals: BTreeMap<String, StudentTimeSpent> = BTreeMap::new();
    for row in rows {
        let Some(student_id) = extract_student_id(&row.actor_account_name) else {
            continue;
        };
        let entry = totals.entry(student_id.to_string()).or_default();
        entry.total_minutes += row.minutes_spent;
        entry.active_days += 1;
    }
    for entry in totals.values_mut() {
        entry.total_minutes = round2(entry.total_minutes);
        entry.avg_minutes_per_day = if entry.active_days > 0 {
            round2(entry.total_minutes / entry.active_days as f64)
        } else {
            0.0
        };
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(actor: &str, month: u64, flag: u64, hours: f64) -> SchoolHomeRow {
        SchoolHomeRow {
            actor_account_name: actor.to_string(),
            month,
            school_time_flag: flag,
            time_spent_hours: hours,
        }
    }

    #[test]
    fn year_aggregation_splits_school_and_home() {
        let rows = vec![
            row("101@school", 202304, 1, 3.0),
            row("101@school", 202304, 0, 1.0),
            row("Learner:202", 202305, 0, 2.0),
        ];
        let year = aggregate_year(2023, &rows);
        assert_eq!(year.split.school_hours, 3.0);
        assert_eq!(year.split.home_hours, 3.0);
        assert_eq!(year.split.total_hours, 6.0);
        assert_eq!(year.split.school_percentage, 50.0);
        assert_eq!(year.split.student_count, 2);
        assert_eq!(year.monthly.len(), 2);
        assert_eq!(year.monthly[0].month, "2023-04");
        assert_eq!(year.monthly[0].split.school_percentage, 75.0);
    }

    #[test]
    fn non_student_actors_are_skipped() {
        let rows = vec![row("teacher-a", 202304, 1, 5.0)];
        let year = aggregate_year(2023, &rows);
        assert_eq!(year.split.total_hours, 0.0);
        assert_eq!(year.split.student_count, 0);
    }

    #[test]
    fn empty_year_has_zero_percentages() {
        let year = aggregate_year(2023, &[]);
        assert_eq!(year.split.school_percentage, 0.0);
        assert_eq!(year.split.home_percentage, 0.0);
    }

    #[test]
    fn actor_patterns_cover_all_name_forms() {
        let patterns = actor_patterns(&["42".to_string()]);
        assert!(patterns.contains("'42@%'"));
        assert!(patterns.contains("'Learner:42'"));
        assert!(patterns.contains("LIKE '42'"));
    }
}
