//! Benesse grade analytics from the analysis store.
//!
//! Grades live in `course_student_scores` and are always restricted to
//! Benesse files. Courses are matched to academic years by catalog
//! membership, never by upload date.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{info, warn};

use super::courses::{FilterType, StudentFilter};

/// Benesse files carry either the romanized or the Japanese provider name.
const BENESSE_FILTER: &str = "(name LIKE '%Benesse%' OR name LIKE '%ベネッセ%')";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IndividualGrade {
    pub student_id: String,
    pub grade: f64,
    pub created_at: Option<NaiveDateTime>,
    pub course_name: Option<String>,
    pub grade_file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionBin {
    pub bin_start: u32,
    pub bin_end: u32,
    pub bin_label: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GradeStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
    pub range: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeDistribution {
    pub course_id: String,
    pub course_name: Option<String>,
    pub individual_grades: Vec<IndividualGrade>,
    pub distribution_data: Vec<DistributionBin>,
    pub stats: Option<GradeStats>,
    pub filter_info: Option<StudentFilter>,
    pub academic_year: i32,
    pub grade_file_names: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GradeDistribution {
    pub fn empty(course_id: &str, academic_year: i32, error: String) -> Self {
        Self {
            course_id: course_id.to_string(),
            course_name: None,
            individual_grades: Vec::new(),
            distribution_data: Vec::new(),
            stats: None,
            filter_info: None,
            academic_year,
            grade_file_names: String::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StudentGradeSummary {
    pub student_id: String,
    pub average_grade: f64,
    pub total_grades: i64,
    pub course_count: i64,
    pub min_grade: f64,
    pub max_grade: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample standard deviation; zero for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Summary statistics matching the dashboard's box-plot fields.
pub fn grade_stats(values: &[f64]) -> GradeStats {
    if values.is_empty() {
        return GradeStats::default();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let min = sorted[0];
    let max = sorted[n - 1];

    let (q1, q3) = if n > 2 {
        (median(&sorted[..n / 2]), median(&sorted[n.div_ceil(2)..]))
    } else {
        (min, max)
    };

    GradeStats {
        count: n,
        mean: round2(mean(values)),
        median: round2(median(values)),
        std_dev: round2(std_dev(values)),
        min: round2(min),
        max: round2(max),
        q1: round2(q1),
        q3: round2(q3),
        range: round2(max - min),
    }
}

/// 10-point histogram bins: 0-9, 10-19, ... 90-100 (the last bin closes
/// at 100 so perfect scores are counted).
pub fn distribution_bins(values: &[f64]) -> Vec<DistributionBin> {
    let total = values.len();
    (0..10)
        .map(|i| {
            let bin_start = i * 10;
            let bin_end = if i < 9 { bin_start + 9 } else { 100 };
            let count = values
                .iter()
                .filter(|&&g| g >= bin_start as f64 && g <= bin_end as f64)
                .count();
            let percentage = if total > 0 {
                ((count as f64 / total as f64) * 1000.0).round() / 10.0
            } else {
                0.0
            };
            DistributionBin {
                bin_start,
                bin_end,
                bin_label: format!("{bin_start}-{bin_end}"),
                count,
                percentage,
            }
        })
        .collect()
}

/// Distinct source file names of the fetched grades, sorted and comma-joined.
fn joined_file_names(grades: &[IndividualGrade]) -> String {
    let mut names: Vec<&str> = grades
        .iter()
        .filter_map(|g| g.grade_file_name.as_deref())
        .collect();
    names.sort_unstable();
    names.dedup();
    names.join(", ")
}

fn student_filter_clause(filter: &StudentFilter) -> String {
    let placeholders = vec!["?"; filter.filter_ids.len()].join(", ");
    match filter.filter_type {
        FilterType::NotIn => {
            format!(" AND student_id NOT IN ({placeholders}) AND student_id IS NOT NULL")
        }
        FilterType::In => format!(" AND student_id IN ({placeholders})"),
    }
}

/// Individual Benesse grades for one course, with histogram and stats.
/// The caller must already have validated the course against the year's
/// catalog; failures degrade to an empty payload with an error string.
pub async fn course_grade_distribution(
    analysis: &MySqlPool,
    course_id: &str,
    academic_year: i32,
    filter: &StudentFilter,
) -> GradeDistribution {
    if filter.filter_ids.is_empty() {
        return GradeDistribution::empty(
            course_id,
            academic_year,
            "No student filter data available".to_string(),
        );
    }

    let sql = format!(
        r#"
        SELECT
            student_id,
            quiz AS grade,
            created_at,
            course_name,
            name AS grade_file_name
        FROM course_student_scores
        WHERE course_id = ?
          AND quiz IS NOT NULL
          AND {BENESSE_FILTER}{}
        ORDER BY quiz DESC
        "#,
        student_filter_clause(filter)
    );

    let mut query = sqlx::query_as::<_, IndividualGrade>(&sql).bind(course_id);
    for id in &filter.filter_ids {
        query = query.bind(id);
    }

    let grades = match query.fetch_all(analysis).await {
        Ok(grades) => grades,
        Err(err) => {
            warn!(course_id, academic_year, error = %err, "grade distribution query failed");
            return GradeDistribution::empty(course_id, academic_year, err.to_string());
        }
    };

    if grades.is_empty() {
        return GradeDistribution::empty(
            course_id,
            academic_year,
            format!("No Benesse grades found for course {course_id} in academic year {academic_year}"),
        );
    }

    let values: Vec<f64> = grades.iter().map(|g| g.grade).collect();
    let grade_file_names = joined_file_names(&grades);

    info!(course_id, academic_year, grades = values.len(), "grade distribution assembled");
    GradeDistribution {
        course_id: course_id.to_string(),
        course_name: grades[0].course_name.clone(),
        distribution_data: distribution_bins(&values),
        stats: Some(grade_stats(&values)),
        individual_grades: grades,
        filter_info: Some(filter.clone()),
        academic_year,
        grade_file_names,
        error: None,
    }
}

/// Per-student grade aggregates for the year's courses, grades clamped to
/// the valid 0..=100 window.
pub async fn students_grades_for_year(
    analysis: &MySqlPool,
    filter: &StudentFilter,
    course_ids: &[i64],
) -> Result<Vec<StudentGradeSummary>> {
    if filter.filter_ids.is_empty() || course_ids.is_empty() {
        return Ok(Vec::new());
    }
    let course_placeholders = vec!["?"; course_ids.len()].join(", ");
    let sql = format!(
        r#"
        SELECT
            student_id,
            AVG(quiz) AS average_grade,
            COUNT(*) AS total_grades,
            COUNT(DISTINCT course_id) AS course_count,
            MIN(quiz) AS min_grade,
            MAX(quiz) AS max_grade
        FROM course_student_scores
        WHERE quiz IS NOT NULL
          AND quiz >= 0 AND quiz <= 100
          AND {BENESSE_FILTER}{}
          AND course_id IN ({course_placeholders})
        GROUP BY student_id
        HAVING total_grades >= 1
        ORDER BY student_id
        "#,
        student_filter_clause(filter)
    );

    let mut query = sqlx::query_as::<_, StudentGradeSummary>(&sql);
    for id in &filter.filter_ids {
        query = query.bind(id);
    }
    for course_id in course_ids {
        query = query.bind(course_id.to_string());
    }
    query
        .fetch_all(analysis)
        .await
        .context("failed to fetch per-student grades")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(value: f64, file_name: Option<&str>) -> IndividualGrade {
        IndividualGrade {
            student_id: "1".into(),
            grade: value,
            created_at: None,
            course_name: None,
            grade_file_name: file_name.map(str::to_owned),
        }
    }

    #[test]
    fn file_names_are_deduped_and_sorted() {
        let grades = [
            grade(80.0, Some("b.csv")),
            grade(60.0, Some("a.csv")),
            grade(70.0, Some("b.csv")),
            grade(90.0, None),
        ];
        assert_eq!(joined_file_names(&grades), "a.csv, b.csv");
        assert_eq!(joined_file_names(&[]), "");
    }

    #[test]
    fn stats_on_simple_series() {
        let values = [70.0, 80.0, 90.0, 100.0];
        let stats = grade_stats(&values);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 85.0);
        assert_eq!(stats.median, 85.0);
        assert_eq!(stats.min, 70.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.q1, 75.0);
        assert_eq!(stats.q3, 95.0);
        assert_eq!(stats.range, 30.0);
    }

    #[test]
    fn single_grade_has_zero_spread() {
        let stats = grade_stats(&[55.0]);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.q1, 55.0);
        assert_eq!(stats.q3, 55.0);
    }

    #[test]
    fn bins_cover_zero_to_hundred() {
        let bins = distribution_bins(&[0.0, 9.0, 10.0, 95.0, 100.0]);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].bin_label, "0-9");
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[1].count, 1);
        assert_eq!(bins[9].bin_label, "90-100");
        assert_eq!(bins[9].count, 2);
        assert_eq!(bins[0].percentage, 40.0);
    }

    #[test]
    fn median_of_even_series_averages_middle() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }
}
