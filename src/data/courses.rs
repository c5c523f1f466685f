//! Past-years course catalog: Moodle categories carry Japanese academic
//! year names ("2023年度"), so the catalog is grouped per year by the root
//! category.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::ids::academic_year_from_category_name;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CourseHierarchyRow {
    pub parent_category_id: i64,
    pub parent_category_name: String,
    pub child_category_id: i64,
    pub child_category_name: String,
    pub course_id: i64,
    pub course_name: String,
    pub course_shortname: String,
    pub course_summary: Option<String>,
    pub course_sortorder: i64,
    pub course_visible: i8,
    pub course_startdate: i64,
    pub course_enddate: i64,
    pub course_created: i64,
    pub course_modified: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub shortname: String,
    pub summary: Option<String>,
    pub sortorder: i64,
    pub visible: bool,
    pub startdate: Option<NaiveDateTime>,
    pub enddate: Option<NaiveDateTime>,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildCategory {
    pub id: i64,
    pub name: String,
    pub courses: Vec<Course>,
    pub course_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentCategory {
    pub id: i64,
    pub name: String,
    pub academic_year: i32,
    pub children: BTreeMap<i64, ChildCategory>,
    pub course_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourseSummaryStats {
    pub by_category: BTreeMap<String, usize>,
    pub by_month_created: BTreeMap<String, usize>,
    pub total_visible: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearCourses {
    pub academic_year: i32,
    pub categories: BTreeMap<i64, ParentCategory>,
    pub total_courses: usize,
    pub course_summary: CourseSummaryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl YearCourses {
    pub fn empty(academic_year: i32, error: Option<String>) -> Self {
        Self {
            academic_year,
            categories: BTreeMap::new(),
            total_courses: 0,
            course_summary: CourseSummaryStats::default(),
            error,
        }
    }

    /// Every course id in the catalog, in category order.
    pub fn course_ids(&self) -> Vec<i64> {
        self.categories
            .values()
            .flat_map(|parent| parent.children.values())
            .flat_map(|child| child.courses.iter().map(|c| c.id))
            .collect()
    }
}

fn from_unix(ts: i64) -> Option<NaiveDateTime> {
    if ts <= 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.naive_utc())
}

/// Fetch the parent/child category hierarchy and keep only courses whose
/// root category names the requested academic year.
pub async fn courses_by_academic_year(moodle: &MySqlPool, academic_year: i32) -> YearCourses {
    let rows: Vec<CourseHierarchyRow> = match hierarchy(moodle).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(academic_year, error = %err, "course hierarchy query failed");
            return YearCourses::empty(academic_year, Some(err.to_string()));
        }
    };

    let mut result = YearCourses::empty(academic_year, None);
    for row in rows {
        let Some(parent_year) = academic_year_from_category_name(&row.parent_category_name) else {
            continue;
        };
        if parent_year != academic_year {
            continue;
        }

        let course = Course {
            id: row.course_id,
            name: row.course_name,
            shortname: row.course_shortname,
            summary: row.course_summary,
            sortorder: row.course_sortorder,
            visible: row.course_visible != 0,
            startdate: from_unix(row.course_startdate),
            enddate: from_unix(row.course_enddate),
            created: from_unix(row.course_created),
            modified: from_unix(row.course_modified),
        };

        let category_key = format!("{} > {}", row.parent_category_name, row.child_category_name);
        *result.course_summary.by_category.entry(category_key).or_default() += 1;
        if let Some(created) = course.created {
            let month_key = created.format("%Y-%m").to_string();
            *result.course_summary.by_month_created.entry(month_key).or_default() += 1;
        }
        if course.visible {
            result.course_summary.total_visible += 1;
        }

        let parent = result
            .categories
            .entry(row.parent_category_id)
            .or_insert_with(|| ParentCategory {
                id: row.parent_category_id,
                name: row.parent_category_name.clone(),
                academic_year: parent_year,
                children: BTreeMap::new(),
                course_count: 0,
            });
        let child = parent
            .children
            .entry(row.child_category_id)
            .or_insert_with(|| ChildCategory {
                id: row.child_category_id,
                name: row.child_category_name.clone(),
                courses: Vec::new(),
                course_count: 0,
            });
        child.courses.push(course);
        child.course_count += 1;
        parent.course_count += 1;
        result.total_courses += 1;
    }

    info!(academic_year, courses = result.total_courses, "course catalog assembled");
    result
}

pub async fn hierarchy(moodle: &MySqlPool) -> Result<Vec<CourseHierarchyRow>> {
    sqlx::query_as(
        r#"
        SELECT
            parent_cat.id AS parent_category_id,
            parent_cat.name AS parent_category_name,
            child_cat.id AS child_category_id,
            child_cat.name AS child_category_name,
            course.id AS course_id,
            course.fullname AS course_name,
            course.shortname AS course_shortname,
            course.summary AS course_summary,
            course.sortorder AS course_sortorder,
            course.visible AS course_visible,
            course.startdate AS course_startdate,
            course.enddate AS course_enddate,
            course.timecreated AS course_created,
            course.timemodified AS course_modified
        FROM mdl_course_categories parent_cat
        JOIN mdl_course_categories child_cat ON child_cat.parent = parent_cat.id
        LEFT JOIN mdl_course course ON course.category = child_cat.id
        WHERE parent_cat.parent = 0
          AND course.id IS NOT NULL
        ORDER BY parent_cat.sortorder, child_cat.sortorder, course.sortorder
        "#,
    )
    .fetch_all(moodle)
    .await
    .context("failed to fetch course hierarchy")
}

/// Distinct root category names parsed into academic years, newest first.
pub async fn available_academic_years(moodle: &MySqlPool) -> Result<Vec<i32>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT name FROM mdl_course_categories WHERE parent = 0 ORDER BY name DESC",
    )
    .fetch_all(moodle)
    .await
    .context("failed to fetch root categories")?;

    let mut years: Vec<i32> = names
        .iter()
        .filter_map(|name| academic_year_from_category_name(name))
        .collect();
    years.sort_unstable();
    years.dedup();
    years.reverse();
    Ok(years)
}

async fn user_ids_for_courses(
    moodle: &MySqlPool,
    course_ids: &[i64],
    roles: &[&str],
) -> Result<Vec<String>> {
    if course_ids.is_empty() {
        return Ok(Vec::new());
    }
    let role_list = roles
        .iter()
        .map(|r| format!("'{r}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; course_ids.len()].join(", ");
    let sql = format!(
        r#"
        SELECT DISTINCT u.id
        FROM mdl_user u
        JOIN mdl_role_assignments ra ON u.id = ra.userid
        JOIN mdl_role r ON ra.roleid = r.id
        JOIN mdl_context ctx ON ra.contextid = ctx.id
        JOIN mdl_course c ON ctx.instanceid = c.id
        WHERE r.shortname IN ({role_list})
          AND ctx.contextlevel = 50
          AND u.deleted = 0
          AND u.suspended = 0
          AND c.id IN ({placeholders})
        ORDER BY u.id
        "#
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for id in course_ids {
        query = query.bind(id);
    }
    let ids = query
        .fetch_all(moodle)
        .await
        .context("failed to fetch enrolled user ids")?;
    Ok(ids.into_iter().map(|id| id.to_string()).collect())
}

/// Distinct student ids enrolled in the year's courses.
pub async fn student_ids_for_year(
    moodle: &MySqlPool,
    courses: &YearCourses,
) -> Result<Vec<String>> {
    user_ids_for_courses(moodle, &courses.course_ids(), &["student"]).await
}

/// Distinct teaching/managing user ids enrolled in the year's courses.
pub async fn non_student_ids_for_year(
    moodle: &MySqlPool,
    courses: &YearCourses,
) -> Result<Vec<String>> {
    user_ids_for_courses(
        moodle,
        &courses.course_ids(),
        &["teacher", "editingteacher", "manager", "coursecreator"],
    )
    .await
}

/// Which side of the grade filter to interpolate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterType {
    In,
    NotIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentFilter {
    pub filter_type: FilterType,
    pub filter_ids: Vec<String>,
    pub filter_count: usize,
}

/// Exclude non-students when they are non-empty and fewer than 30% of the
/// student count; otherwise include students directly.
pub fn optimal_student_filter(students: Vec<String>, non_students: Vec<String>) -> StudentFilter {
    let threshold = (students.len() as f64) * 0.3;
    if !non_students.is_empty() && (non_students.len() as f64) < threshold {
        StudentFilter {
            filter_count: non_students.len(),
            filter_type: FilterType::NotIn,
            filter_ids: non_students,
        }
    } else {
        StudentFilter {
            filter_count: students.len(),
            filter_type: FilterType::In,
            filter_ids: students,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    #[test]
    fn filter_prefers_not_in_when_non_students_are_few() {
        let filter = optimal_student_filter(ids(100), ids(10));
        assert_eq!(filter.filter_type, FilterType::NotIn);
        assert_eq!(filter.filter_count, 10);
    }

    #[test]
    fn filter_falls_back_to_in() {
        // At the 30% boundary NOT_IN is no longer worth it.
        let filter = optimal_student_filter(ids(100), ids(30));
        assert_eq!(filter.filter_type, FilterType::In);
        assert_eq!(filter.filter_count, 100);

        let filter = optimal_student_filter(ids(100), Vec::new());
        assert_eq!(filter.filter_type, FilterType::In);
    }

    #[test]
    fn unix_zero_is_no_date() {
        assert!(from_unix(0).is_none());
        assert!(from_unix(1_700_000_000).is_some());
    }
}
