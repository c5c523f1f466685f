//! Database handles and routing.
//!
//! The service reads from five stores: its own Postgres (holidays, synced
//! courses, key-value state), the Moodle and BookRoll MySQL databases, the
//! analysis MySQL database holding Benesse scores, and two ClickHouse
//! warehouses split at a cutover academic year.

use anyhow::{Context, Result};
use chrono::Datelike;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, MySqlPool, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::warehouse::Warehouse;

/// All connection handles, cloned freely across tasks.
#[derive(Clone)]
pub struct Databases {
    /// Service-owned Postgres.
    pub app: PgPool,
    /// Read-only Moodle (`mdl_*` tables).
    pub moodle: MySqlPool,
    /// Read-only BookRoll (`br_contents`).
    pub bookroll: MySqlPool,
    /// Analysis store (`course_student_scores`).
    pub analysis: MySqlPool,
    /// Warehouse for the cutover year onwards.
    pub warehouse: Warehouse,
    /// Warehouse for years before the cutover.
    pub warehouse_old: Warehouse,
    /// First academic year served by `warehouse`.
    pub cutover_year: i32,
}

impl Databases {
    pub async fn connect(config: &Config) -> Result<Self> {
        let app = connect_postgres(&config.database_url).await?;
        let moodle = connect_mysql("moodle", &config.moodle_database_url).await?;
        let bookroll = connect_mysql("bookroll", &config.bookroll_database_url).await?;
        let analysis = connect_mysql("analysis", &config.analysis_database_url).await?;

        let warehouse = Warehouse::new("warehouse", &config.warehouse)?;
        let warehouse_old = Warehouse::new("warehouse_old", &config.warehouse_pre_2025)?;

        Ok(Self {
            app,
            moodle,
            bookroll,
            analysis,
            warehouse,
            warehouse_old,
            cutover_year: config.warehouse_cutover_year,
        })
    }

    /// Pick the warehouse holding statements for one academic year.
    pub fn warehouse_for_academic_year(&self, year: i32) -> &Warehouse {
        if year >= self.cutover_year {
            &self.warehouse
        } else {
            &self.warehouse_old
        }
    }

    /// Pick the warehouse for a `YYYY-MM-DD`-bounded date range. Any bound
    /// in or after the cutover year routes to the current warehouse; if
    /// neither bound parses, fall back to today's year.
    pub fn warehouse_for_date_range(&self, start: &str, end: &str) -> &Warehouse {
        match range_year_hint(start, end) {
            Some(year) => self.warehouse_for_academic_year(year),
            None => self.warehouse_for_academic_year(chrono::Utc::now().year()),
        }
    }

    /// Both warehouses, current first. Used by queries that always merge
    /// history (log counts, liveness probes).
    pub fn all_warehouses(&self) -> [&Warehouse; 2] {
        [&self.warehouse, &self.warehouse_old]
    }
}

/// The largest year found in the `YYYY` prefixes of the two date strings.
fn range_year_hint(start: &str, end: &str) -> Option<i32> {
    [start, end]
        .iter()
        .filter_map(|s| s.get(..4)?.parse::<i32>().ok())
        .max()
}

async fn connect_postgres(url: &str) -> Result<PgPool> {
    let connect_options = PgConnectOptions::from_str(url)
        .context("Failed to parse database URL")?
        .log_statements(tracing::log::LevelFilter::Debug)
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

    let pool = PgPoolOptions::new()
        .min_connections(0)
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(4))
        .idle_timeout(Duration::from_secs(60 * 2))
        .max_lifetime(Duration::from_secs(60 * 30))
        .connect_with(connect_options)
        .await
        .context("Failed to create database pool")?;

    info!(
        min_connections = 0,
        max_connections = 4,
        acquire_timeout = "4s",
        idle_timeout = "2m",
        max_lifetime = "30m",
        "app database pool established"
    );
    Ok(pool)
}

async fn connect_mysql(name: &'static str, url: &str) -> Result<MySqlPool> {
    let connect_options = MySqlConnectOptions::from_str(url)
        .with_context(|| format!("Failed to parse {name} database URL"))?
        .log_statements(tracing::log::LevelFilter::Debug)
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(2));

    let pool = MySqlPoolOptions::new()
        .min_connections(0)
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(4))
        .idle_timeout(Duration::from_secs(60 * 2))
        .connect_with(connect_options)
        .await
        .with_context(|| format!("Failed to create {name} pool"))?;

    info!(database = name, max_connections = 4, "mysql pool established");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_hint_takes_the_larger_bound() {
        assert_eq!(range_year_hint("2023-04-01", "2024-03-31"), Some(2024));
        assert_eq!(range_year_hint("2024-04-01", "2025-06-01"), Some(2025));
    }

    #[test]
    fn year_hint_tolerates_garbage() {
        assert_eq!(range_year_hint("soon", "2024-01-01"), Some(2024));
        assert_eq!(range_year_hint("soon", "later"), None);
        assert_eq!(range_year_hint("", ""), None);
    }
}
