//! Student queries: Moodle profiles decorated with warehouse activity.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::warn;

use crate::cache::{AnalyticsCache, TTL_SHORT};
use crate::warehouse::{Warehouse, ch_u64, quote, quote_list};

/// How recent the newest statement must be for a student to count as online.
const ONLINE_THRESHOLD: Duration = Duration::minutes(2);

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StudentSummary {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub total_courses: i64,
    pub archived_courses: i64,
    pub active_courses: i64,
    #[sqlx(skip)]
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentPage {
    pub students: Vec<StudentSummary>,
    pub total_pages: i64,
    pub current_page: i64,
    pub page_size: i64,
    pub total_records: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StudentProfile {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub city: String,
    pub country: String,
    pub total_courses: i64,
    pub archived_courses: i64,
    pub active_courses: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub actor_account_name: String,
    pub object_id: String,
    pub object_definition_name_en: String,
    pub operation_name: String,
    pub contents_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastAction {
    pub is_online: bool,
    pub last_action_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyOperationCount {
    #[serde(rename = "date")]
    pub day: NaiveDate,
    pub operation_name: String,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub daily_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentEnrollment {
    pub course_id: i64,
    pub course_name: String,
    pub category_id: Option<i64>,
    pub category_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentDetail {
    #[serde(flatten)]
    pub profile: StudentProfile,
    pub contents_ids: Vec<String>,
    pub quiz_answers: Vec<QuizAnswer>,
    pub last_action: LastAction,
    pub activity_by_day: Vec<DailyOperationCount>,
    pub enrollments: Vec<StudentEnrollment>,
    pub recent_course_access: Vec<super::teachers::RecentCourseAccess>,
}

/// Warehouse timestamps are naive UTC; a student is online when their
/// newest statement is within the threshold.
pub fn is_online(last_event: NaiveDateTime, now: DateTime<Utc>) -> bool {
    last_event.and_utc() > now - ONLINE_THRESHOLD
}

/// Paginated student list with optional search over name/username/email.
pub async fn page(
    moodle: &MySqlPool,
    warehouse: &Warehouse,
    search: Option<&str>,
    page: i64,
    page_size: i64,
) -> Result<StudentPage> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 200);

    let mut filter = String::from(
        "r.shortname = 'student' AND ctx.contextlevel = 50 AND u.deleted = 0",
    );
    if search.is_some() {
        filter.push_str(
            " AND (u.username LIKE ? OR u.firstname LIKE ? OR u.lastname LIKE ? OR u.email LIKE ?)",
        );
    }

    let base = format!(
        r#"
        SELECT u.id AS user_id, u.username, u.email, u.firstname, u.lastname,
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
        FROM mdl_user u
        JOIN mdl_role_assignments ra ON u.id = ra.userid
        JOIN mdl_role r ON ra.roleid = r.id
        JOIN mdl_context ctx ON ra.contextid = ctx.id
        JOIN mdl_course c ON ctx.instanceid = c.id
        WHERE {filter}
        GROUP BY u.id, u.username, u.email, u.firstname, u.lastname
        ORDER BY u.firstname, u.lastname
        "#
    );

    let pattern = search.map(|s| format!("%{s}%"));

    let count_sql = format!("SELECT COUNT(*) FROM ({base}) AS sub");
    let mut count_query = sqlx::query_scalar(&count_sql);
    if let Some(p) = &pattern {
        for _ in 0..4 {
            count_query = count_query.bind(p.clone());
        }
    }
    let total_records: i64 = count_query
        .fetch_one(moodle)
        .await
        .context("failed to count students")?;

    let offset = (page - 1) * page_size;
    let page_sql = format!("{base} LIMIT ? OFFSET ?");
    let mut page_query = sqlx::query_as(&page_sql);
    if let Some(p) = &pattern {
        for _ in 0..4 {
            page_query = page_query.bind(p.clone());
        }
    }
    let mut students: Vec<StudentSummary> = page_query
        .bind(page_size)
        .bind(offset)
        .fetch_all(moodle)
        .await
        .context("failed to fetch student page")?;

    decorate_online(warehouse, &mut students).await;

    Ok(StudentPage {
        students,
        total_pages: (total_records + page_size - 1) / page_size,
        current_page: page,
        page_size,
        total_records,
    })
}

/// Mark each student online when their newest statement is within the
/// threshold. Warehouse failures leave everyone offline.
async fn decorate_online(warehouse: &Warehouse, students: &mut [StudentSummary]) {
    if students.is_empty() {
        return;
    }

    #[derive(Deserialize)]
    struct Row {
        actor_account_name: String,
        #[serde(with = "crate::warehouse::ch_datetime")]
        last_event: NaiveDateTime,
    }

    let ids: Vec<String> = students.iter().map(|s| s.user_id.to_string()).collect();
    let sql = format!(
        r#"
        SELECT actor_account_name, MAX(timestamp) AS last_event
        FROM statements_mv
        WHERE actor_account_name IN {}
        GROUP BY actor_account_name
        "#,
        quote_list(&ids)
    );

    let rows: Vec<Row> = match warehouse.fetch_all(&sql).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %err, "online-status query failed, marking all offline");
            return;
        }
    };

    let now = Utc::now();
    for student in students.iter_mut() {
        let id = student.user_id.to_string();
        student.is_online = rows
            .iter()
            .find(|r| r.actor_account_name == id)
            .is_some_and(|r| is_online(r.last_event, now));
    }
}

pub async fn profile(moodle: &MySqlPool, user_id: i64) -> Result<Option<StudentProfile>> {
    sqlx::query_as(
        r#"
        SELECT u.id AS user_id, u.username, u.email, u.firstname, u.lastname,
               u.city, u.country,
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
        FROM mdl_user u
        JOIN mdl_role_assignments ra ON u.id = ra.userid
        JOIN mdl_role r ON ra.roleid = r.id
        JOIN mdl_context ctx ON ra.contextid = ctx.id
        JOIN mdl_course c ON ctx.instanceid = c.id
        WHERE r.shortname = 'student'
          AND ctx.contextlevel = 50
          AND u.deleted = 0
          AND u.id = ?
        GROUP BY u.id, u.username, u.email, u.firstname, u.lastname, u.city, u.country
        "#,
    )
    .bind(user_id)
    .fetch_optional(moodle)
    .await
    .context("failed to fetch student profile")
}

/// Full student detail: Moodle profile plus warehouse-derived activity.
/// Warehouse sub-queries degrade to empty on failure.
pub async fn detail(
    moodle: &MySqlPool,
    warehouse: &Warehouse,
    cache: &AnalyticsCache,
    user_id: i64,
) -> Result<Option<StudentDetail>> {
    let Some(profile) = profile(moodle, user_id).await? else {
        return Ok(None);
    };
    let actor = quote(&user_id.to_string());

    let contents_ids = warehouse_or_empty(
        "student_contents",
        contents_ids(warehouse, &actor).await,
    );
    let quiz_answers = warehouse_or_empty(
        "student_quiz_answers",
        quiz_answers(warehouse, &actor).await,
    );
    let last_action = last_action(warehouse, &actor).await.unwrap_or(LastAction {
        is_online: false,
        last_action_time: None,
    });
    let activity_by_day = warehouse_or_empty(
        "student_activity_by_day",
        activity_by_day(warehouse, &actor).await,
    );

    let enrollments = cache
        .get_or_compute_as(
            &format!("students:enrollments:{user_id}"),
            TTL_SHORT,
            || async { enrollments(moodle, user_id).await },
        )
        .await
        .unwrap_or_else(|err| {
            warn!(user_id, error = %err, "student enrollments query failed");
            Vec::new()
        });
    let recent_course_access = super::teachers::recent_course_access(moodle, user_id)
        .await
        .unwrap_or_else(|err| {
            warn!(user_id, error = %err, "recent course access query failed");
            Vec::new()
        });

    Ok(Some(StudentDetail {
        profile,
        contents_ids,
        quiz_answers,
        last_action,
        activity_by_day,
        enrollments,
        recent_course_access,
    }))
}

fn warehouse_or_empty<T>(label: &str, result: anyhow::Result<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|err| {
        warn!(query = label, error = %err, "warehouse query failed, using empty result");
        Vec::new()
    })
}

async fn contents_ids(warehouse: &Warehouse, actor: &str) -> anyhow::Result<Vec<String>> {
    #[derive(Deserialize)]
    struct Row {
        contents_id: String,
    }
    let rows: Vec<Row> = warehouse
        .fetch_all(&format!(
            r#"
            SELECT contents_id FROM statements_mv
            WHERE actor_account_name = {actor}
            GROUP BY contents_id
            "#
        ))
        .await?;
    Ok(rows.into_iter().map(|r| r.contents_id).collect())
}

async fn quiz_answers(warehouse: &Warehouse, actor: &str) -> anyhow::Result<Vec<QuizAnswer>> {
    Ok(warehouse
        .fetch_all(&format!(
            r#"
            SELECT DISTINCT actor_account_name, object_id,
                   object_definition_name_en, operation_name, contents_id
            FROM statements_mv
            WHERE actor_account_name = {actor}
              AND operation_name = 'ANSWER_QUIZ'
              AND contents_id != ''
            "#
        ))
        .await?)
}

async fn last_action(warehouse: &Warehouse, actor: &str) -> anyhow::Result<LastAction> {
    #[derive(Deserialize)]
    struct Row {
        #[serde(with = "crate::warehouse::ch_datetime::option", default)]
        last_action_time: Option<NaiveDateTime>,
    }
    let row: Option<Row> = warehouse
        .fetch_optional(&format!(
            r#"
            SELECT MAX(timestamp) AS last_action_time
            FROM statements_mv
            WHERE actor_account_name = {actor}
            "#
        ))
        .await?;

    let last = row.and_then(|r| r.last_action_time);
    Ok(LastAction {
        is_online: last.is_some_and(|t| is_online(t, Utc::now())),
        last_action_time: last.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
    })
}

/// Per-day distinct statement counts by operation over the last year.
async fn activity_by_day(
    warehouse: &Warehouse,
    actor: &str,
) -> anyhow::Result<Vec<DailyOperationCount>> {
    Ok(warehouse
        .fetch_all(&format!(
            r#"
            SELECT toDate(timestamp) AS date, operation_name,
                   uniqExact(_id) AS daily_count
            FROM statements_mv
            WHERE actor_account_name = {actor}
              AND timestamp >= today() - INTERVAL 1 YEAR
            GROUP BY date, operation_name
            ORDER BY date ASC, operation_name
            "#
        ))
        .await?)
}

async fn enrollments(moodle: &MySqlPool, user_id: i64) -> Result<Vec<StudentEnrollment>> {
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
            ch.category_id,
            ch.full_category_path AS category_path
        FROM mdl_role_assignments ra
        INNER JOIN mdl_context ctx ON ra.contextid = ctx.id
        INNER JOIN mdl_course c ON ctx.instanceid = c.id
        LEFT JOIN category_hierarchy ch ON c.category = ch.category_id
        WHERE ra.userid = ?
          AND ctx.contextlevel = 50
          AND ra.roleid IN (
              SELECT id FROM mdl_role WHERE shortname IN ('student', 'learner')
          )
        ORDER BY category_path, course_name
        "#,
    )
    .bind(user_id)
    .fetch_all(moodle)
    .await
    .context("failed to fetch student enrollments")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn online_threshold_is_two_minutes() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap();
        let fresh = now.naive_utc() - Duration::minutes(1);
        let stale = now.naive_utc() - Duration::minutes(3);
        assert!(is_online(fresh, now));
        assert!(!is_online(stale, now));
    }

    #[test]
    fn statement_from_this_second_counts_as_online() {
        let now = Utc::now();
        assert!(is_online(now.naive_utc(), now));
    }
}
