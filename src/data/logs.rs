//! Statement volume reporting across both warehouse generations.
//!
//! Periods from the two warehouses are merged by summing, so the report
//! stays correct if statements around the cutover land in both. The
//! current-generation warehouse only holds data from the cutover year on,
//! so it is skipped entirely before that calendar year.

use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::Databases;
use crate::warehouse::{Warehouse, ch_u64};

/// Earliest year with trustworthy log data.
const LOG_EPOCH: &str = "2018-01-01";
const LOG_EPOCH_YEAR: u64 = 2018;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogView {
    Month,
    Year,
}

#[derive(Debug, Deserialize)]
struct PeriodRow {
    #[serde(deserialize_with = "ch_u64::deserialize")]
    period: u64,
    #[serde(deserialize_with = "ch_u64::deserialize")]
    total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPeriod {
    pub period: String,
    pub count: u64,
    pub academic_year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LogDatabaseInfo {
    pub available: bool,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogDateRange {
    pub earliest: String,
    pub latest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogCounts {
    pub periods: Vec<LogPeriod>,
    pub total_count: u64,
    pub database_info: BTreeMap<&'static str, LogDatabaseInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<LogDateRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseSummary {
    pub available: bool,
    pub statement_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSummaryStats {
    pub databases: BTreeMap<&'static str, WarehouseSummary>,
    pub total_statements: u64,
}

fn period_sql(view: LogView) -> String {
    match view {
        LogView::Month => format!(
            r#"
            SELECT toYYYYMM(timestamp) AS period, COUNT(DISTINCT _id) AS total
            FROM statements_mv
            WHERE timestamp >= toDate('{LOG_EPOCH}')
              AND _id != ''
            GROUP BY period
            ORDER BY period ASC
            "#
        ),
        LogView::Year => format!(
            r#"
            SELECT
                CASE
                    WHEN toMonth(timestamp) >= 4 THEN toYear(timestamp)
                    ELSE toYear(timestamp) - 1
                END AS period,
                COUNT(DISTINCT _id) AS total
            FROM statements_mv
            WHERE timestamp >= toDate('{LOG_EPOCH}')
              AND _id != ''
            GROUP BY period
            HAVING period >= {LOG_EPOCH_YEAR}
            ORDER BY period ASC
            "#
        ),
    }
}

/// The current-generation warehouse holds nothing before the cutover year.
fn active_sources(db: &Databases) -> Vec<&Warehouse> {
    let mut sources = vec![&db.warehouse_old];
    if chrono::Utc::now().year() >= db.cutover_year {
        sources.push(&db.warehouse);
    }
    sources
}

fn format_period(view: LogView, raw: u64, count: u64) -> LogPeriod {
    match view {
        LogView::Month => {
            let year = (raw / 100) as i32;
            let month = (raw % 100) as u32;
            LogPeriod {
                period: format!("{year:04}-{month:02}"),
                count,
                academic_year: if month >= 4 { year } else { year - 1 },
                year: Some(year),
                month: Some(month),
                period_display: None,
            }
        }
        LogView::Year => LogPeriod {
            period: raw.to_string(),
            count,
            academic_year: raw as i32,
            year: None,
            month: None,
            period_display: Some(format!("{raw}年度")),
        },
    }
}

fn merge_periods(batches: &[Vec<PeriodRow>]) -> BTreeMap<u64, u64> {
    let mut merged: BTreeMap<u64, u64> = BTreeMap::new();
    for batch in batches {
        for row in batch {
            *merged.entry(row.period).or_default() += row.total;
        }
    }
    merged
}

/// Statement counts per calendar month or academic year, merged across
/// both warehouses. A failing warehouse degrades to unavailable.
pub async fn counts_by_period(db: &Databases, view: LogView) -> LogCounts {
    let sql = period_sql(view);
    let mut database_info: BTreeMap<&'static str, LogDatabaseInfo> = BTreeMap::new();
    let mut batches: Vec<Vec<PeriodRow>> = Vec::new();

    for warehouse in active_sources(db) {
        match warehouse.fetch_all::<PeriodRow>(&sql).await {
            Ok(rows) => {
                database_info.insert(
                    warehouse.name(),
                    LogDatabaseInfo {
                        available: true,
                        count: rows.iter().map(|r| r.total).sum(),
                        error: None,
                    },
                );
                batches.push(rows);
            }
            Err(err) => {
                warn!(warehouse = warehouse.name(), error = %err, "log count query failed");
                database_info.insert(
                    warehouse.name(),
                    LogDatabaseInfo {
                        available: false,
                        count: 0,
                        error: Some(err.to_string()),
                    },
                );
            }
        }
    }

    let merged = merge_periods(&batches);
    let periods: Vec<LogPeriod> = merged
        .iter()
        .map(|(&raw, &count)| format_period(view, raw, count))
        .collect();
    let date_range = match (periods.first(), periods.last()) {
        (Some(first), Some(last)) => Some(LogDateRange {
            earliest: first.period.clone(),
            latest: last.period.clone(),
        }),
        _ => None,
    };

    info!(periods = periods.len(), "log period counts assembled");
    LogCounts {
        total_count: periods.iter().map(|p| p.count).sum(),
        periods,
        database_info,
        date_range,
    }
}

/// Per-warehouse statement totals and timestamp bounds. A warehouse that
/// fails to answer is reported unavailable instead of failing the report.
pub async fn summary_stats(db: &Databases) -> LogSummaryStats {
    #[derive(Deserialize)]
    struct StatsRow {
        #[serde(deserialize_with = "ch_u64::deserialize")]
        statement_count: u64,
        earliest: String,
        latest: String,
    }

    let sql = format!(
        r#"
        SELECT
            COUNT(DISTINCT _id) AS statement_count,
            toString(MIN(timestamp)) AS earliest,
            toString(MAX(timestamp)) AS latest
        FROM statements_mv
        WHERE timestamp >= toDate('{LOG_EPOCH}')
          AND _id != ''
        "#
    );

    let mut databases: BTreeMap<&'static str, WarehouseSummary> = BTreeMap::new();
    let mut total = 0u64;
    for warehouse in db.all_warehouses() {
        match warehouse.fetch_optional::<StatsRow>(&sql).await {
            Ok(Some(row)) if row.statement_count > 0 => {
                total += row.statement_count;
                databases.insert(
                    warehouse.name(),
                    WarehouseSummary {
                        available: true,
                        statement_count: row.statement_count,
                        earliest: Some(row.earliest),
                        latest: Some(row.latest),
                        error: None,
                    },
                );
            }
            Ok(_) => {
                databases.insert(
                    warehouse.name(),
                    WarehouseSummary {
                        available: true,
                        statement_count: 0,
                        earliest: None,
                        latest: None,
                        error: None,
                    },
                );
            }
            Err(err) => {
                warn!(warehouse = warehouse.name(), error = %err, "log summary query failed");
                databases.insert(
                    warehouse.name(),
                    WarehouseSummary {
                        available: false,
                        statement_count: 0,
                        earliest: None,
                        latest: None,
                        error: Some(err.to_string()),
                    },
                );
            }
        }
    }

    LogSummaryStats {
        databases,
        total_statements: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_shared_periods() {
        let batches = vec![
            vec![
                PeriodRow { period: 202403, total: 10 },
                PeriodRow { period: 202404, total: 5 },
            ],
            vec![PeriodRow { period: 202404, total: 7 }],
        ];
        let merged = merge_periods(&batches);
        assert_eq!(merged[&202403], 10);
        assert_eq!(merged[&202404], 12);
    }

    #[test]
    fn month_periods_carry_academic_year() {
        let march = format_period(LogView::Month, 202403, 1);
        assert_eq!(march.period, "2024-03");
        assert_eq!(march.academic_year, 2023);

        let april = format_period(LogView::Month, 202404, 1);
        assert_eq!(april.academic_year, 2024);
        assert_eq!(april.month, Some(4));
    }

    #[test]
    fn year_periods_use_japanese_display() {
        let year = format_period(LogView::Year, 2023, 42);
        assert_eq!(year.period, "2023");
        assert_eq!(year.period_display.as_deref(), Some("2023年度"));
        assert!(year.month.is_none());
    }
}
