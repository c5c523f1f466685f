//! Dashboard-index aggregates across Moodle, BookRoll, and the warehouse.
//!
//! Every sub-query degrades to an empty result on failure so one broken
//! source never takes the whole overview down.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::warn;

use crate::state::AppState;
use crate::warehouse::{Warehouse, ch_u64};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DayCount {
    pub day: NaiveDate,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseDayCount {
    pub date: NaiveDate,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentActivity {
    pub contents_id: String,
    pub contents_name: String,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
    pub object_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorActivity {
    pub actor_account_name: String,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    pub total_activities: u64,
}

/// One row of the most-active-students board, resolved against Moodle
/// where the actor name is a Moodle user id.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveStudent {
    pub moodle_id: String,
    pub username: String,
    pub name: String,
    pub total_activities: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewSnapshot {
    pub student_count: i64,
    pub course_count: i64,
    pub content_count: i64,
    pub active_students: u64,
    pub most_active_contents: Vec<ContentActivity>,
    pub most_memo_contents: Vec<ContentActivity>,
    pub most_marked_contents: Vec<ContentActivity>,
    pub most_active_students: Vec<ActiveStudent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewDaily {
    pub students_by_day: Vec<DayCount>,
    pub courses_by_day: Vec<DayCount>,
    pub contents_by_day: Vec<DayCount>,
    pub active_students_by_day: Vec<WarehouseDayCount>,
    pub daily_active_users: Vec<WarehouseDayCount>,
    pub daily_activities: Vec<WarehouseDayCount>,
}

fn or_empty<T: Default, E: std::fmt::Display>(label: &str, result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(query = label, error = %err, "overview query failed, using empty result");
            T::default()
        }
    }
}

pub async fn snapshot(state: &AppState) -> OverviewSnapshot {
    let moodle = &state.db.moodle;
    let warehouse = &state.db.warehouse;

    let student_count = or_empty("student_count", student_count(moodle).await);
    let course_count = or_empty("course_count", course_count(moodle).await);
    let content_count = or_empty("content_count", content_count(&state.db.bookroll).await);
    let active_students = or_empty("active_students", active_students(warehouse).await);
    let most_active_contents =
        or_empty("most_active_contents", most_active_contents(warehouse).await);
    let most_memo_contents = or_empty(
        "most_memo_contents",
        contents_by_operation(warehouse, "ADD_HW_MEMO").await,
    );
    let most_marked_contents = or_empty(
        "most_marked_contents",
        contents_by_operation(warehouse, "ADD_MARKER").await,
    );
    let most_active_students = or_empty(
        "most_active_students",
        most_active_students(warehouse, moodle).await,
    );

    OverviewSnapshot {
        student_count,
        course_count,
        content_count,
        active_students,
        most_active_contents,
        most_memo_contents,
        most_marked_contents,
        most_active_students,
    }
}

pub async fn daily(state: &AppState) -> OverviewDaily {
    let moodle = &state.db.moodle;
    let warehouse = &state.db.warehouse;

    OverviewDaily {
        students_by_day: or_empty(
            "students_by_day",
            created_by_day(moodle, "mdl_user", "deleted = 0").await,
        ),
        courses_by_day: or_empty(
            "courses_by_day",
            created_by_day(moodle, "mdl_course", "id != 1").await,
        ),
        contents_by_day: or_empty("contents_by_day", contents_by_day(&state.db.bookroll).await),
        active_students_by_day: or_empty(
            "active_students_by_day",
            active_students_by_day(warehouse).await,
        ),
        daily_active_users: or_empty("daily_active_users", daily_active_users(warehouse).await),
        daily_activities: or_empty("daily_activities", daily_activities(warehouse).await),
    }
}

/// Distinct users holding the `student` role in a visible course context.
async fn student_count(moodle: &MySqlPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT ra.userid)
        FROM mdl_role_assignments ra
        JOIN mdl_role r ON ra.roleid = r.id
        JOIN mdl_context ctx ON ra.contextid = ctx.id
        JOIN mdl_course c ON ctx.instanceid = c.id
        JOIN mdl_user u ON u.id = ra.userid
        WHERE r.shortname = 'student'
          AND ctx.contextlevel = 50
          AND u.deleted = 0
          AND u.suspended = 0
          AND c.visible = 1
          AND c.id != 1
        "#,
    )
    .fetch_one(moodle)
    .await
}

async fn course_count(moodle: &MySqlPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM mdl_course WHERE visible = 1 AND id != 1")
        .fetch_one(moodle)
        .await
}

async fn content_count(bookroll: &MySqlPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(DISTINCT contents_id) FROM br_contents")
        .fetch_one(bookroll)
        .await
}

/// Rows created per day over the last week, from a Unix `timecreated` column.
async fn created_by_day(
    moodle: &MySqlPool,
    table: &str,
    extra: &str,
) -> Result<Vec<DayCount>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT DATE(FROM_UNIXTIME(timecreated)) AS day, COUNT(*) AS total
        FROM {table}
        WHERE timecreated >= UNIX_TIMESTAMP(CURDATE() - INTERVAL 6 DAY)
          AND {extra}
        GROUP BY day ORDER BY day ASC
        "#
    );
    sqlx::query_as(&sql).fetch_all(moodle).await
}

async fn contents_by_day(bookroll: &MySqlPool) -> Result<Vec<DayCount>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT DATE(created) AS day, COUNT(*) AS total
        FROM br_contents
        WHERE created >= CURDATE() - INTERVAL 6 DAY
        GROUP BY day ORDER BY day ASC
        "#,
    )
    .fetch_all(bookroll)
    .await
}

async fn active_students(warehouse: &Warehouse) -> anyhow::Result<u64> {
    #[derive(Deserialize)]
    struct Row {
        #[serde(deserialize_with = "ch_u64::deserialize")]
        total: u64,
    }
    let row: Option<Row> = warehouse
        .fetch_optional(
            r#"
            SELECT COUNT(DISTINCT actor_account_name) AS total
            FROM statements_mv
            WHERE actor_name_role = 'student'
            "#,
        )
        .await?;
    Ok(row.map(|r| r.total).unwrap_or(0))
}

async fn active_students_by_day(warehouse: &Warehouse) -> anyhow::Result<Vec<WarehouseDayCount>> {
    Ok(warehouse
        .fetch_all(
            r#"
            SELECT toDate(timestamp) AS date,
                   COUNT(DISTINCT actor_account_name) AS total
            FROM statements_mv
            WHERE actor_name_role = 'student'
              AND timestamp >= today() - INTERVAL 6 DAY
            GROUP BY date ORDER BY date ASC
            "#,
        )
        .await?)
}

async fn daily_active_users(warehouse: &Warehouse) -> anyhow::Result<Vec<WarehouseDayCount>> {
    Ok(warehouse
        .fetch_all(
            r#"
            SELECT toDate(timestamp) AS date,
                   COUNT(DISTINCT actor_account_name) AS total
            FROM statements_mv
            WHERE timestamp >= today() - 30
              AND actor_account_name != ''
            GROUP BY date ORDER BY date ASC
            "#,
        )
        .await?)
}

async fn daily_activities(warehouse: &Warehouse) -> anyhow::Result<Vec<WarehouseDayCount>> {
    Ok(warehouse
        .fetch_all(
            r#"
            SELECT toDate(timestamp) AS date,
                   uniqExact(_id) AS total
            FROM statements_mv
            WHERE timestamp >= today() - 30
            GROUP BY date ORDER BY date ASC
            "#,
        )
        .await?)
}

async fn most_active_contents(warehouse: &Warehouse) -> anyhow::Result<Vec<ContentActivity>> {
    Ok(warehouse
        .fetch_all(
            r#"
            SELECT contents_id, contents_name,
                   uniqExact(_id) AS total_activities, object_id
            FROM statements_mv
            WHERE contents_id != ''
            GROUP BY contents_id, contents_name, object_id
            ORDER BY total_activities DESC
            LIMIT 10
            "#,
        )
        .await?)
}

/// Top-10 contents by distinct statement id for one operation.
async fn contents_by_operation(
    warehouse: &Warehouse,
    operation: &str,
) -> anyhow::Result<Vec<ContentActivity>> {
    let sql = format!(
        r#"
        SELECT contents_id, contents_name,
               uniqExact(_id) AS total_activities, object_id
        FROM statements_mv
        WHERE operation_name = {}
          AND actor_name_role = 'student'
          AND contents_id != ''
        GROUP BY contents_id, contents_name, object_id
        ORDER BY total_activities DESC
        LIMIT 10
        "#,
        crate::warehouse::quote(operation)
    );
    Ok(warehouse.fetch_all(&sql).await?)
}

/// Top-10 actors by distinct statement id, joined against Moodle where the
/// actor name is a plain user id. Unmatched actors keep their raw name.
async fn most_active_students(
    warehouse: &Warehouse,
    moodle: &MySqlPool,
) -> anyhow::Result<Vec<ActiveStudent>> {
    let actors: Vec<ActorActivity> = warehouse
        .fetch_all(
            r#"
            SELECT actor_account_name, uniqExact(_id) AS total_activities
            FROM statements_mv
            WHERE actor_name_role = 'student'
              AND actor_account_name != ''
            GROUP BY actor_account_name
            ORDER BY total_activities DESC
            LIMIT 10
            "#,
        )
        .await?;

    let numeric_ids: Vec<i64> = actors
        .iter()
        .filter_map(|a| a.actor_account_name.parse().ok())
        .collect();

    #[derive(sqlx::FromRow)]
    struct MoodleUser {
        id: i64,
        username: String,
        firstname: String,
        lastname: String,
    }
    let users: Vec<MoodleUser> = if numeric_ids.is_empty() {
        Vec::new()
    } else {
        let placeholders = vec!["?"; numeric_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, username, firstname, lastname FROM mdl_user WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query_as(&sql);
        for id in &numeric_ids {
            query = query.bind(id);
        }
        query.fetch_all(moodle).await?
    };

    Ok(actors
        .into_iter()
        .map(|actor| {
            let matched = actor
                .actor_account_name
                .parse::<i64>()
                .ok()
                .and_then(|id| users.iter().find(|u| u.id == id));
            match matched {
                Some(user) => ActiveStudent {
                    moodle_id: user.id.to_string(),
                    username: user.username.clone(),
                    name: format!("{} {}", user.firstname, user.lastname),
                    total_activities: actor.total_activities,
                },
                None => ActiveStudent {
                    moodle_id: actor.actor_account_name.clone(),
                    username: actor.actor_account_name.clone(),
                    name: actor.actor_account_name,
                    total_activities: actor.total_activities,
                },
            }
        })
        .collect())
}
