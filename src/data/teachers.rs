//! Teacher queries against Moodle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;

/// A course is archived when hidden or past its end date; active otherwise.
/// MySQL SUM() yields DECIMAL, so the buckets are cast back to integers.
const COURSE_BUCKETS: &str = r#"
    COUNT(*) AS total_courses,
    CAST(SUM(CASE
        WHEN c.visible = 0 THEN 1
        WHEN c.enddate > 0 AND c.enddate < UNIX_TIMESTAMP() THEN 1
        ELSE 0
    END) AS SIGNED) AS archived_courses,
    CAST(SUM(CASE
        WHEN c.visible = 1 AND (c.enddate = 0 OR c.enddate >= UNIX_TIMESTAMP()) THEN 1
        ELSE 0
    END) AS SIGNED) AS active_courses
"#;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeacherSummary {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub total_courses: i64,
    pub archived_courses: i64,
    pub active_courses: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeacherDetail {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub city: String,
    pub country: String,
    pub lastlogin: i64,
    pub timecreated: i64,
    pub total_courses: i64,
    pub archived_courses: i64,
    pub active_courses: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourseEnrollment {
    pub course_id: i64,
    pub course_name: String,
    pub course_shortname: String,
    pub visible: i8,
    pub startdate: i64,
    pub enddate: i64,
    pub category_id: Option<i64>,
    pub category_path: Option<String>,
    pub role_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentCourseAccess {
    pub course_id: i64,
    pub course_name: String,
    pub timeaccess: i64,
    pub timeaccess_formatted: String,
    pub category_name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LastAccessRow {
    pub course_id: i64,
    pub course_name: String,
    pub timeaccess: i64,
    pub category_name: Option<String>,
}

impl From<LastAccessRow> for RecentCourseAccess {
    fn from(row: LastAccessRow) -> Self {
        let formatted = chrono::DateTime::from_timestamp(row.timeaccess, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        Self {
            course_id: row.course_id,
            course_name: row.course_name,
            timeaccess: row.timeaccess,
            timeaccess_formatted: formatted,
            category_name: row.category_name.unwrap_or_else(|| "Uncategorized".to_string()),
        }
    }
}

/// Per-teacher course totals, ordered by load then name.
pub async fn list(moodle: &MySqlPool) -> Result<Vec<TeacherSummary>> {
    let sql = format!(
        r#"
        SELECT u.id AS user_id, u.username, u.email, u.firstname, u.lastname,
               {COURSE_BUCKETS}
        FROM mdl_user u
        JOIN mdl_role_assignments ra ON u.id = ra.userid
        JOIN mdl_role r ON ra.roleid = r.id
        JOIN mdl_context ctx ON ra.contextid = ctx.id
        JOIN mdl_course c ON ctx.instanceid = c.id
        WHERE r.shortname IN ('editingteacher', 'teacher')
          AND ctx.contextlevel = 50
          AND u.deleted = 0
        GROUP BY u.id, u.username, u.email, u.firstname, u.lastname
        ORDER BY total_courses, u.firstname, u.lastname
        "#
    );
    sqlx::query_as(&sql)
        .fetch_all(moodle)
        .await
        .context("failed to fetch teacher list")
}

pub async fn detail(moodle: &MySqlPool, user_id: i64) -> Result<Option<TeacherDetail>> {
    let sql = format!(
        r#"
        SELECT u.id AS user_id, u.username, u.email, u.firstname, u.lastname,
               u.city, u.country, u.lastlogin, u.timecreated,
               {COURSE_BUCKETS}
        FROM mdl_user u
        JOIN mdl_role_assignments ra ON u.id = ra.userid
        JOIN mdl_role r ON ra.roleid = r.id
        JOIN mdl_context ctx ON ra.contextid = ctx.id
        JOIN mdl_course c ON ctx.instanceid = c.id
        WHERE r.shortname IN ('editingteacher', 'teacher')
          AND ctx.contextlevel = 50
          AND u.deleted = 0
          AND u.id = ?
        GROUP BY u.id, u.username, u.email, u.firstname, u.lastname,
                 u.city, u.country, u.lastlogin, u.timecreated
        "#
    );
    sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_optional(moodle)
        .await
        .context("failed to fetch teacher detail")
}

/// Course enrollments with full category paths via a recursive CTE over
/// `mdl_course_categories`.
pub async fn enrollments(moodle: &MySqlPool, user_id: i64) -> Result<Vec<CourseEnrollment>> {
    sqlx::query_as(
        r#"
        WITH RECURSIVE category_hierarchy AS (
            SELECT id AS category_id, name AS category_name, parent AS parent_id,
                   name AS full_category_path
            FROM mdl_course_categories
            WHERE parent = 0
            UNION ALL
            SELECT child.id, child.name, child.parent,
                   CONCAT(parent_hierarchy.full_category_path, ' / ', child.name)
            FROM mdl_course_categories child
            INNER JOIN category_hierarchy parent_hierarchy
                ON child.parent = parent_hierarchy.category_id
        )
        SELECT DISTINCT
            c.id AS course_id,
            c.fullname AS course_name,
            c.shortname AS course_shortname,
            c.visible,
            c.startdate,
            c.enddate,
            ch.category_id,
            ch.full_category_path AS category_path,
            r.shortname AS role_name
        FROM mdl_role_assignments ra
        INNER JOIN mdl_context ctx ON ra.contextid = ctx.id
        INNER JOIN mdl_course c ON ctx.instanceid = c.id
        LEFT JOIN category_hierarchy ch ON c.category = ch.category_id
        INNER JOIN mdl_role r ON ra.roleid = r.id
        WHERE ra.userid = ?
          AND ctx.contextlevel = 50
          AND r.shortname IN ('teacher', 'editingteacher')
        ORDER BY category_path, course_name
        "#,
    )
    .bind(user_id)
    .fetch_all(moodle)
    .await
    .context("failed to fetch teacher enrollments")
}

/// Courses accessed within the last 30 days, newest first.
pub async fn recent_course_access(
    moodle: &MySqlPool,
    user_id: i64,
) -> Result<Vec<RecentCourseAccess>> {
    let rows: Vec<LastAccessRow> = sqlx::query_as(
        r#"
        SELECT c.id AS course_id, c.fullname AS course_name,
               ula.timeaccess, cc.name AS category_name
        FROM mdl_user_lastaccess ula
        JOIN mdl_user u ON u.id = ula.userid
        JOIN mdl_course c ON c.id = ula.courseid
        LEFT JOIN mdl_course_categories cc ON c.category = cc.id
        WHERE u.id = ?
          AND ula.timeaccess >= UNIX_TIMESTAMP(NOW() - INTERVAL 30 DAY)
        ORDER BY ula.timeaccess DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(moodle)
    .await
    .context("failed to fetch recent course access")?;
    Ok(rows.into_iter().map(Into::into).collect())
}
