//! Service configuration, extracted from the environment via Figment.

use serde::Deserialize;

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_cutover_year() -> i32 {
    2025
}

fn default_school_start() -> String {
    "09:00".to_string()
}

fn default_school_end() -> String {
    "16:00".to_string()
}

/// Longest gap between two statements still counted as one reading session (seconds).
fn default_max_session_duration() -> i64 {
    5400
}

/// Cap applied to a single statement-to-statement gap (seconds).
fn default_max_activity_duration() -> i64 {
    1800
}

/// Holiday sync span, in years before/after the current one.
fn default_holiday_years_back() -> i32 {
    7
}

fn default_holiday_years_ahead() -> i32 {
    1
}

/// Connection settings for one ClickHouse warehouse (HTTP interface).
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

/// LEAF content-image API credentials (OAuth client credentials).
#[derive(Debug, Clone, Deserialize)]
pub struct LeafApiConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres for the service's own data (holidays, synced courses, app_kv).
    pub database_url: String,
    /// Read-only Moodle MySQL (`mdl_*` tables).
    pub moodle_database_url: String,
    /// Read-only BookRoll MySQL (`br_contents`).
    pub bookroll_database_url: String,
    /// Analysis MySQL holding `course_student_scores` (Benesse grades).
    pub analysis_database_url: String,

    /// ClickHouse warehouse for data at or after the cutover year.
    pub warehouse: WarehouseConfig,
    /// ClickHouse warehouse for historical data before the cutover year.
    pub warehouse_pre_2025: WarehouseConfig,

    /// First academic year served by the current warehouse.
    #[serde(default = "default_cutover_year")]
    pub warehouse_cutover_year: i32,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds to wait for in-flight requests on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// School hours (JST, "HH:MM") used to split school vs home reading time.
    #[serde(default = "default_school_start")]
    pub school_start_time: String,
    #[serde(default = "default_school_end")]
    pub school_end_time: String,
    #[serde(default = "default_max_session_duration")]
    pub max_session_duration: i64,
    #[serde(default = "default_max_activity_duration")]
    pub max_activity_duration: i64,

    /// How many calendar years of holidays to keep synced, around now.
    #[serde(default = "default_holiday_years_back")]
    pub holiday_years_back: i32,
    #[serde(default = "default_holiday_years_ahead")]
    pub holiday_years_ahead: i32,

    /// Optional LEAF content API; without it activities carry no page images.
    #[serde(default)]
    pub leaf_api: Option<LeafApiConfig>,
}

impl Config {
    /// Parse an "HH:MM" school-hours boundary into minutes from midnight.
    pub fn parse_school_minutes(value: &str) -> Option<u32> {
        let (hours, minutes) = value.split_once(':')?;
        let hours: u32 = hours.parse().ok()?;
        let minutes: u32 = minutes.parse().ok()?;
        if hours >= 24 || minutes >= 60 {
            return None;
        }
        Some(hours * 60 + minutes)
    }

    /// School window as (start, end) minutes from midnight, with the
    /// documented defaults when a value fails to parse.
    pub fn school_window_minutes(&self) -> (u32, u32) {
        let start = Self::parse_school_minutes(&self.school_start_time).unwrap_or(9 * 60);
        let end = Self::parse_school_minutes(&self.school_end_time).unwrap_or(16 * 60);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_school_minutes() {
        assert_eq!(Config::parse_school_minutes("09:00"), Some(540));
        assert_eq!(Config::parse_school_minutes("16:30"), Some(990));
        assert_eq!(Config::parse_school_minutes("24:00"), None);
        assert_eq!(Config::parse_school_minutes("9"), None);
        assert_eq!(Config::parse_school_minutes("ab:cd"), None);
    }
}
