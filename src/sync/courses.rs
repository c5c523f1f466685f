//! Moodle course catalog snapshot into the app database.
//!
//! The hierarchy query is the same one the past-years analytics use; the
//! snapshot gives the rest of the app a local `courses` table that stays
//! usable when Moodle is slow or down.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::{MySqlPool, PgPool};
use tracing::debug;

use crate::data::courses;

fn from_unix(ts: i64) -> Option<NaiveDateTime> {
    if ts <= 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.naive_utc())
}

/// Upsert the full course hierarchy into the local `courses` table.
/// Returns the number of courses synced.
pub async fn sync(app: &PgPool, moodle: &MySqlPool) -> Result<usize> {
    let rows = courses::hierarchy(moodle).await?;
    let total = rows.len();

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO courses (
                course_id, name, shortname, summary,
                parent_category_id, parent_category_name,
                category_id, category_name,
                sortorder, visible, startdate, enddate, created, modified,
                last_synced
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
            ON CONFLICT (course_id) DO UPDATE SET
                name = EXCLUDED.name,
                shortname = EXCLUDED.shortname,
                summary = EXCLUDED.summary,
                parent_category_id = EXCLUDED.parent_category_id,
                parent_category_name = EXCLUDED.parent_category_name,
                category_id = EXCLUDED.category_id,
                category_name = EXCLUDED.category_name,
                sortorder = EXCLUDED.sortorder,
                visible = EXCLUDED.visible,
                startdate = EXCLUDED.startdate,
                enddate = EXCLUDED.enddate,
                created = EXCLUDED.created,
                modified = EXCLUDED.modified,
                last_synced = NOW()
            "#,
        )
        .bind(row.course_id)
        .bind(&row.course_name)
        .bind(&row.course_shortname)
        .bind(&row.course_summary)
        .bind(row.parent_category_id)
        .bind(&row.parent_category_name)
        .bind(row.child_category_id)
        .bind(&row.child_category_name)
        .bind(row.course_sortorder)
        .bind(row.course_visible != 0)
        .bind(from_unix(row.course_startdate))
        .bind(from_unix(row.course_enddate))
        .bind(from_unix(row.course_created))
        .bind(from_unix(row.course_modified))
        .execute(app)
        .await
        .with_context(|| format!("failed to upsert course {}", row.course_id))?;
    }

    debug!(total, "course snapshot upserted");
    Ok(total)
}
