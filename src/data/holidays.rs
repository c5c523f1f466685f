//! Japanese public holiday lookups against the app database. The table is
//! kept fresh by the background sync.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

/// Holiday dates within the range as `YYYY-MM-DD` strings, ready to be
/// interpolated into warehouse SQL.
pub async fn dates_between(
    app: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<String>, sqlx::Error> {
    let dates: Vec<NaiveDate> = sqlx::query_scalar(
        "SELECT date FROM japanese_holidays WHERE date >= $1 AND date <= $2 ORDER BY date",
    )
    .bind(start)
    .bind(end)
    .fetch_all(app)
    .await?;
    Ok(dates
        .into_iter()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect())
}

/// All holidays in one calendar year.
pub async fn for_year(app: &PgPool, year: i32) -> Result<Vec<Holiday>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT date, name FROM japanese_holidays
        WHERE date >= make_date($1, 1, 1) AND date < make_date($1 + 1, 1, 1)
        ORDER BY date
        "#,
    )
    .bind(year)
    .fetch_all(app)
    .await
}

/// The next few holidays from today on.
pub async fn upcoming(app: &PgPool, limit: i64) -> Result<Vec<Holiday>, sqlx::Error> {
    sqlx::query_as(
        "SELECT date, name FROM japanese_holidays WHERE date >= CURRENT_DATE ORDER BY date LIMIT $1",
    )
    .bind(limit)
    .fetch_all(app)
    .await
}

pub async fn upsert(
    app: &PgPool,
    date: NaiveDate,
    name: &str,
    name_en: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO japanese_holidays (date, name, name_en, year)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (date) DO UPDATE
        SET name = EXCLUDED.name,
            name_en = COALESCE(EXCLUDED.name_en, japanese_holidays.name_en),
            updated_at = NOW()
        "#,
    )
    .bind(date)
    .bind(name)
    .bind(name_en)
    .bind(chrono::Datelike::year(&date))
    .execute(app)
    .await?;
    Ok(())
}

pub async fn count(app: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM japanese_holidays")
        .fetch_one(app)
        .await
}
