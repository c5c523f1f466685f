//! Cross-module checks of the pure analytics logic: actor-id
//! reconciliation feeding the grade/time join, histogram binning, and the
//! correlation statistics produced for the dashboard scatter plot.

use chrono::NaiveDate;
use leaf_school::cache::{AnalyticsCache, TTL_SHORT};
use leaf_school::data::correlation::{DataPoint, correlation_statistics};
use leaf_school::data::grades::{distribution_bins, grade_stats};
use leaf_school::data::ids::{
    academic_year_from_category_name, academic_year_of, academic_year_range, extract_student_id,
};
use serde_json::json;

/// Actor names from all three warehouse clients must reconcile to the same
/// Moodle id, since the grade join is keyed on the extracted string.
#[test]
fn actor_formats_reconcile_to_one_id() {
    let formats = [
        "1369@0122CF32-AF85-4798-A2C0-E7BB2B0C22F0",
        "Learner:1369",
        "1369",
    ];
    for name in formats {
        assert_eq!(extract_student_id(name), Some("1369"), "format: {name}");
    }
    assert_eq!(extract_student_id("teacher@uuid"), None);
}

#[test]
fn academic_year_covers_april_through_march() {
    let (start, end) = academic_year_range(2023);
    assert_eq!(academic_year_of(start), 2023);
    assert_eq!(academic_year_of(end), 2023);
    assert_eq!(
        academic_year_of(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
        2024
    );
    assert_eq!(academic_year_from_category_name("2023年度 高校"), Some(2023));
}

#[test]
fn distribution_bins_cover_every_integer_grade_once() {
    let grades: Vec<f64> = vec![0.0, 5.0, 9.0, 10.0, 55.0, 89.0, 90.0, 99.0, 100.0];
    let bins = distribution_bins(&grades);
    assert_eq!(bins.len(), 10);
    assert_eq!(bins[0].bin_label, "0-9");
    assert_eq!(bins[9].bin_label, "90-100");

    let binned: usize = bins.iter().map(|b| b.count).sum();
    assert_eq!(binned, grades.len());
    // 100 lands in the closed last bin, not off the end.
    assert_eq!(bins[9].count, 3);

    // Bin edges are integers, so fractional grades between 9 and 10 fall
    // through the gap and are not binned.
    let gap: usize = distribution_bins(&[9.9]).iter().map(|b| b.count).sum();
    assert_eq!(gap, 0);

    let stats = grade_stats(&grades);
    assert_eq!(stats.count, grades.len());
    assert_eq!(stats.min, 0.0);
    assert_eq!(stats.max, 100.0);
    assert_eq!(stats.median, 55.0);
}

#[test]
fn noisy_positive_data_is_labeled_moderate_or_stronger() {
    let points: Vec<DataPoint> = [
        (42.0, 30.0, 5),
        (55.0, 120.0, 12),
        (48.0, 90.0, 9),
        (71.0, 340.0, 30),
        (64.0, 210.0, 21),
        (80.0, 400.0, 41),
        (59.0, 260.0, 18),
        (90.0, 520.0, 55),
    ]
    .iter()
    .enumerate()
    .map(|(i, &(grade, minutes, days))| DataPoint {
        student_id: format!("{}", 1000 + i),
        grade,
        time_spent_minutes: minutes,
        active_days: days,
    })
    .collect();

    let stats = correlation_statistics(&points).unwrap();
    assert!(stats.correlation_coefficient > 0.5);
    assert_eq!(stats.direction, "positive");
    assert!(matches!(stats.strength, "Moderate" | "Strong"));
    assert_eq!(stats.sample_size, 8);
    assert_eq!(stats.regression_line.len(), 21);
    // The fitted line should predict higher grades for more reading time.
    let first = &stats.regression_line[0];
    let last = &stats.regression_line[20];
    assert!(last.y > first.y);
}

#[tokio::test]
async fn cache_round_trips_computed_payloads() {
    let cache = AnalyticsCache::new();

    let value = cache
        .get_or_compute("correlation:2023", TTL_SHORT, || async {
            Ok(json!({"academic_year": 2023}))
        })
        .await
        .unwrap();
    assert_eq!(*value, json!({"academic_year": 2023}));

    // A fresh entry is served without recomputing.
    let hit = cache
        .get_or_compute("correlation:2023", TTL_SHORT, || async {
            unreachable!("value should be cached")
        })
        .await
        .unwrap();
    assert_eq!(*hit, *value);

    assert_eq!(cache.clear_prefix("correlation:"), 1);
}
