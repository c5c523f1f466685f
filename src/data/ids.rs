//! Identifier reconciliation between warehouse actors and Moodle users.
//!
//! Warehouse `actor_account_name` values arrive in several shapes depending
//! on which client wrote the statement. The mapping to Moodle user ids is
//! best-effort string parsing; rows whose actor name yields no id are
//! skipped by callers.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static ACADEMIC_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Category names look like "2023年度" with optional surrounding text.
    Regex::new(r"(\d{4})年度").unwrap_or_else(|_| unreachable!())
});

/// Extract a numeric student id from a warehouse actor account name.
///
/// Recognized shapes:
/// - `"1369@0122CF32-…"` (digits before an `@` and a device UUID)
/// - `"Learner:2549"`
/// - `"2549"` (bare digits)
pub fn extract_student_id(actor_account_name: &str) -> Option<&str> {
    let name = actor_account_name.trim();
    if name.is_empty() {
        return None;
    }

    if let Some((prefix, _)) = name.split_once('@') {
        if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Some(prefix);
        }
        return None;
    }

    if let Some(rest) = name.strip_prefix("Learner:") {
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            return Some(rest);
        }
        return None;
    }

    if name.bytes().all(|b| b.is_ascii_digit()) {
        return Some(name);
    }
    None
}

/// Parse the academic year out of a Japanese category name ("2023年度 …").
pub fn academic_year_from_category_name(name: &str) -> Option<i32> {
    ACADEMIC_YEAR_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Date range of one academic year: April 1 through March 31 of the next.
/// Clamps at chrono's representable range for absurd input years.
pub fn academic_year_range(year: i32) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(year, 4, 1).unwrap_or(NaiveDate::MIN);
    let end = NaiveDate::from_ymd_opt(year + 1, 3, 31).unwrap_or(NaiveDate::MAX);
    (start, end)
}

/// Academic year a date belongs to: April onwards maps to the calendar
/// year, January through March to the previous one.
pub fn academic_year_of(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    if date.month() >= 4 {
        date.year()
    } else {
        date.year() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_all_three_actor_formats() {
        assert_eq!(
            extract_student_id("1369@0122CF32-AF85-4798-A2C0-E7BB2B0C22F0"),
            Some("1369")
        );
        assert_eq!(extract_student_id("Learner:2549"), Some("2549"));
        assert_eq!(extract_student_id("2549"), Some("2549"));
    }

    #[test]
    fn rejects_unrecognized_actor_names() {
        assert_eq!(extract_student_id(""), None);
        assert_eq!(extract_student_id("guest"), None);
        assert_eq!(extract_student_id("abc@uuid"), None);
        assert_eq!(extract_student_id("Learner:"), None);
        assert_eq!(extract_student_id("Learner:12a"), None);
        assert_eq!(extract_student_id("@uuid"), None);
    }

    #[test]
    fn parses_academic_year_categories() {
        assert_eq!(academic_year_from_category_name("2023年度"), Some(2023));
        assert_eq!(academic_year_from_category_name("xx 2021年度 コース"), Some(2021));
        assert_eq!(academic_year_from_category_name("2023"), None);
        assert_eq!(academic_year_from_category_name("年度"), None);
    }

    #[test]
    fn academic_year_runs_april_to_march() {
        let (start, end) = academic_year_range(2023);
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());

        assert_eq!(academic_year_of(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()), 2023);
        assert_eq!(academic_year_of(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()), 2024);
    }
}
