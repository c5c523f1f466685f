//! Grade vs reading-time correlation for one academic year.
//!
//! The pipeline joins per-student Benesse grade averages with warehouse
//! reading-time totals, then fits a least-squares line through the joined
//! points. Each stage that comes up empty short-circuits into an error
//! payload that still carries the stage counts.

use serde::Serialize;
use sqlx::MySqlPool;
use tracing::{info, warn};

use super::courses;
use super::grades::{self, mean, median, std_dev};
use super::ids::academic_year_range;
use super::timespent;
use crate::db::Databases;
use crate::state::AnalyticsSettings;

#[derive(Debug, Clone, Serialize)]
pub struct DataPoint {
    pub student_id: String,
    pub grade: f64,
    pub time_spent_minutes: f64,
    pub active_days: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationStatistics {
    pub correlation_coefficient: f64,
    pub r_squared: f64,
    pub strength: &'static str,
    pub direction: &'static str,
    pub slope: f64,
    pub intercept: f64,
    pub regression_line: Vec<RegressionPoint>,
    pub grade_stats: AxisStats,
    pub time_stats: AxisStats,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CorrelationMetadata {
    pub academic_year: i32,
    pub students_with_grades: usize,
    pub students_with_time_data: usize,
    pub total_data_points: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub academic_year: i32,
    pub data_points: Vec<DataPoint>,
    pub statistics: Option<CorrelationStatistics>,
    pub metadata: CorrelationMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CorrelationReport {
    fn failed(metadata: CorrelationMetadata, error: String) -> Self {
        Self {
            academic_year: metadata.academic_year,
            data_points: Vec::new(),
            statistics: None,
            metadata,
            error: Some(error),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn axis_stats(values: &[f64]) -> AxisStats {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    AxisStats {
        mean: round2(mean(values)),
        std_dev: round2(std_dev(values)),
        min: sorted.first().copied().unwrap_or(0.0),
        max: sorted.last().copied().unwrap_or(0.0),
        median: round2(median(values)),
    }
}

fn strength_of(r: f64) -> &'static str {
    let magnitude = r.abs();
    if magnitude >= 0.7 {
        "Strong"
    } else if magnitude >= 0.5 {
        "Moderate"
    } else if magnitude >= 0.3 {
        "Weak"
    } else {
        "No correlation"
    }
}

fn direction_of(r: f64) -> &'static str {
    if r > 0.0 {
        "positive"
    } else if r < 0.0 {
        "negative"
    } else {
        "no"
    }
}

/// Pearson correlation plus the fitted regression line over the joined
/// points. X is time spent in minutes, Y is the grade average.
pub fn correlation_statistics(points: &[DataPoint]) -> Option<CorrelationStatistics> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let grades: Vec<f64> = points.iter().map(|p| p.grade).collect();
    let times: Vec<f64> = points.iter().map(|p| p.time_spent_minutes).collect();

    let mean_grade = mean(&grades);
    let mean_time = mean(&times);
    let std_grade = std_dev(&grades);
    let std_time = std_dev(&times);

    let sum_xy: f64 = points
        .iter()
        .map(|p| p.grade * p.time_spent_minutes)
        .sum();

    let r = if std_grade > 0.0 && std_time > 0.0 {
        (sum_xy - n * mean_grade * mean_time) / ((n - 1.0) * std_grade * std_time)
    } else {
        0.0
    };

    let (slope, intercept) = if std_time > 0.0 {
        let slope = r * (std_grade / std_time);
        (slope, mean_grade - slope * mean_time)
    } else {
        (0.0, mean_grade)
    };

    let min_time = times.iter().copied().fold(f64::INFINITY, f64::min);
    let max_time = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let regression_line = (0..=20)
        .map(|i| {
            let x = min_time + (max_time - min_time) * i as f64 / 20.0;
            RegressionPoint {
                x: round2(x),
                y: round2(slope * x + intercept),
            }
        })
        .collect();

    Some(CorrelationStatistics {
        correlation_coefficient: round3(r),
        r_squared: round3(r * r),
        strength: strength_of(r),
        direction: direction_of(r),
        slope: round3(slope),
        intercept: round3(intercept),
        regression_line,
        grade_stats: axis_stats(&grades),
        time_stats: axis_stats(&times),
        sample_size: points.len(),
    })
}

/// Full pipeline: year catalog, student filter, Benesse grade averages,
/// warehouse reading time, joined statistics.
pub async fn grade_time_correlation(
    db: &Databases,
    analysis: &MySqlPool,
    settings: &AnalyticsSettings,
    academic_year: i32,
) -> CorrelationReport {
    let mut metadata = CorrelationMetadata {
        academic_year,
        ..CorrelationMetadata::default()
    };

    let catalog = courses::courses_by_academic_year(&db.moodle, academic_year).await;
    if catalog.total_courses == 0 {
        return CorrelationReport::failed(
            metadata,
            format!("No courses found for academic year {academic_year}"),
        );
    }

    let students = match courses::student_ids_for_year(&db.moodle, &catalog).await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(academic_year, error = %err, "student id lookup failed");
            return CorrelationReport::failed(metadata, err.to_string());
        }
    };
    let non_students = courses::non_student_ids_for_year(&db.moodle, &catalog)
        .await
        .unwrap_or_else(|err| {
            warn!(academic_year, error = %err, "non-student id lookup failed");
            Vec::new()
        });
    let filter = courses::optimal_student_filter(students, non_students);

    let grade_rows =
        match grades::students_grades_for_year(analysis, &filter, &catalog.course_ids()).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(academic_year, error = %err, "grade aggregation failed");
                return CorrelationReport::failed(metadata, err.to_string());
            }
        };
    metadata.students_with_grades = grade_rows.len();
    if grade_rows.is_empty() {
        return CorrelationReport::failed(
            metadata,
            format!("No Benesse grades found for academic year {academic_year}"),
        );
    }

    let (start, end) = academic_year_range(academic_year);
    let student_ids: Vec<String> = grade_rows.iter().map(|g| g.student_id.clone()).collect();
    let warehouse = db.warehouse_for_academic_year(academic_year);
    let time_data = match timespent::time_spent_for_students(
        warehouse,
        settings,
        &student_ids,
        &start.format("%Y-%m-%d").to_string(),
        &end.format("%Y-%m-%d").to_string(),
    )
    .await
    {
        Ok(data) => data,
        Err(err) => {
            warn!(academic_year, warehouse = warehouse.name(), error = %err,
                  "time spent query failed");
            return CorrelationReport::failed(metadata, err.to_string());
        }
    };
    metadata.students_with_time_data = time_data.len();
    if time_data.is_empty() {
        return CorrelationReport::failed(
            metadata,
            format!("No reading time data found for academic year {academic_year}"),
        );
    }

    let data_points: Vec<DataPoint> = grade_rows
        .iter()
        .filter_map(|grade| {
            time_data.get(&grade.student_id).map(|time| DataPoint {
                student_id: grade.student_id.clone(),
                grade: round2(grade.average_grade),
                time_spent_minutes: time.total_minutes,
                active_days: time.active_days,
            })
        })
        .collect();
    metadata.total_data_points = data_points.len();

    if data_points.len() < 2 {
        return CorrelationReport::failed(
            metadata,
            "Not enough students with both grades and reading time".to_string(),
        );
    }

    info!(
        academic_year,
        points = data_points.len(),
        "correlation report assembled"
    );
    CorrelationReport {
        academic_year,
        statistics: correlation_statistics(&data_points),
        data_points,
        metadata,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(grade: f64, minutes: f64) -> DataPoint {
        DataPoint {
            student_id: String::new(),
            grade,
            time_spent_minutes: minutes,
            active_days: 1,
        }
    }

    #[test]
    fn perfect_positive_correlation() {
        let points = vec![point(50.0, 100.0), point(60.0, 200.0), point(70.0, 300.0)];
        let stats = correlation_statistics(&points).unwrap();
        assert_eq!(stats.correlation_coefficient, 1.0);
        assert_eq!(stats.r_squared, 1.0);
        assert_eq!(stats.strength, "Strong");
        assert_eq!(stats.direction, "positive");
        assert_eq!(stats.slope, 0.1);
        assert_eq!(stats.intercept, 40.0);
        assert_eq!(stats.regression_line.len(), 21);
        assert_eq!(stats.regression_line[0].x, 100.0);
        assert_eq!(stats.regression_line[0].y, 50.0);
        assert_eq!(stats.regression_line[20].x, 300.0);
    }

    #[test]
    fn constant_time_yields_no_correlation() {
        let points = vec![point(50.0, 120.0), point(90.0, 120.0)];
        let stats = correlation_statistics(&points).unwrap();
        assert_eq!(stats.correlation_coefficient, 0.0);
        assert_eq!(stats.strength, "No correlation");
        assert_eq!(stats.direction, "no");
        assert_eq!(stats.slope, 0.0);
        assert_eq!(stats.intercept, 70.0);
    }

    #[test]
    fn single_point_has_no_statistics() {
        assert!(correlation_statistics(&[point(80.0, 60.0)]).is_none());
    }

    #[test]
    fn strength_thresholds() {
        assert_eq!(strength_of(-0.8), "Strong");
        assert_eq!(strength_of(0.55), "Moderate");
        assert_eq!(strength_of(-0.3), "Weak");
        assert_eq!(strength_of(0.1), "No correlation");
    }
}
