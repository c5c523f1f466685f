//! Japanese holiday sync from the holidays-jp public API.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::data::holidays;

const HOLIDAY_API_BASE: &str = "https://holidays-jp.github.io/api/v1";

/// Fetch one calendar year of holidays as `date -> name`.
async fn fetch_year(client: &reqwest::Client, year: i32) -> Result<BTreeMap<String, String>> {
    let url = format!("{HOLIDAY_API_BASE}/{year}/date.json");
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("holiday request failed for {year}"))?
        .error_for_status()
        .with_context(|| format!("holiday API rejected {year}"))?;
    response
        .json()
        .await
        .with_context(|| format!("invalid holiday payload for {year}"))
}

/// Sync the given span of calendar years into `japanese_holidays`.
/// Returns the number of holidays upserted. A year that fails to fetch is
/// skipped with a warning so one bad year does not lose the rest.
pub async fn sync(app: &PgPool, years: impl Iterator<Item = i32>) -> Result<usize> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build holiday HTTP client")?;

    let mut upserted = 0usize;
    for year in years {
        let fetched = match fetch_year(&client, year).await {
            Ok(map) => map,
            Err(err) => {
                warn!(year, error = %err, "holiday fetch failed, skipping year");
                continue;
            }
        };
        debug!(year, count = fetched.len(), "fetched holidays");
        for (date_str, name) in fetched {
            let Ok(date) = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d") else {
                warn!(date = %date_str, "unparseable holiday date from API");
                continue;
            };
            holidays::upsert(app, date, &name, None)
                .await
                .with_context(|| format!("failed to upsert holiday {date_str}"))?;
            upserted += 1;
        }
    }
    Ok(upserted)
}
