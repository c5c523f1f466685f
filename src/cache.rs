//! In-process TTL cache for computed analytics payloads.
//!
//! Most dashboard queries fan out over the warehouses and Moodle and take
//! seconds; results change slowly, so they are cached as JSON values under
//! string keys with a per-entry TTL. Admin endpoints can flush the whole
//! cache or a key prefix.

use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default TTL for dashboard aggregates.
pub const TTL_DEFAULT: Duration = Duration::from_secs(6 * 60 * 60);
/// Historical data that effectively never changes (past academic years).
pub const TTL_LONG: Duration = Duration::from_secs(24 * 60 * 60);
/// Near-real-time summaries.
pub const TTL_SHORT: Duration = Duration::from_secs(60 * 60);
/// Warehouse log counts.
pub const TTL_LOG: Duration = Duration::from_secs(12 * 60 * 60);
/// Course lists and course-level aggregates.
pub const TTL_COURSE: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Clone, Default)]
pub struct AnalyticsCache {
    /// key → (cached_at, ttl, value)
    entries: Arc<DashMap<String, (Instant, Duration, Arc<Value>)>>,
}

impl AnalyticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cached value if it exists and is fresh.
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let entry = self.entries.get(key)?;
        let (cached_at, ttl, ref value) = *entry;
        if cached_at.elapsed() < ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: String, ttl: Duration, value: Value) {
        self.entries.insert(key, (Instant::now(), ttl, Arc::new(value)));
    }

    /// Fetch from cache, or compute and store. Compute errors are not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> anyhow::Result<Arc<Value>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }
        debug!(key, "cache miss");
        let value = Arc::new(compute().await?);
        self.entries
            .insert(key.to_owned(), (Instant::now(), ttl, value.clone()));
        Ok(value)
    }

    /// Typed variant of [`Self::get_or_compute`]: values round-trip
    /// through their JSON representation.
    pub async fn get_or_compute_as<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let value = self
            .get_or_compute(key, ttl, || async {
                Ok(serde_json::to_value(compute().await?)?)
            })
            .await?;
        Ok(serde_json::from_value(value.as_ref().clone())?)
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Drop entries whose key starts with `prefix`, returning the count.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expired_entries_are_misses() {
        let cache = AnalyticsCache::new();
        cache.insert("k".into(), Duration::ZERO, json!(1));
        assert!(cache.get("k").is_none());

        cache.insert("k".into(), Duration::from_secs(60), json!(2));
        assert_eq!(*cache.get("k").unwrap(), json!(2));
    }

    #[test]
    fn clear_prefix_only_drops_matching_keys() {
        let cache = AnalyticsCache::new();
        cache.insert("grades:2024".into(), TTL_DEFAULT, json!(1));
        cache.insert("grades:2023".into(), TTL_DEFAULT, json!(2));
        cache.insert("logs:total".into(), TTL_DEFAULT, json!(3));

        assert_eq!(cache.clear_prefix("grades:"), 2);
        assert!(cache.get("logs:total").is_some());
        assert_eq!(cache.clear_all(), 1);
    }

    #[tokio::test]
    async fn typed_values_round_trip_through_json() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Enrollment {
            course_id: i64,
            course_name: String,
        }

        let cache = AnalyticsCache::new();
        let rows: Vec<Enrollment> = cache
            .get_or_compute_as("enrollments:7", TTL_SHORT, || async {
                Ok(vec![Enrollment {
                    course_id: 3,
                    course_name: "Algebra".into(),
                }])
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        // The second lookup is served typed from the cached JSON.
        let hit: Vec<Enrollment> = cache
            .get_or_compute_as("enrollments:7", TTL_SHORT, || async {
                panic!("recomputed")
            })
            .await
            .unwrap();
        assert_eq!(hit, rows);
    }

    #[tokio::test]
    async fn get_or_compute_caches_success() {
        let cache = AnalyticsCache::new();
        let value = cache
            .get_or_compute("k", TTL_SHORT, || async { Ok(json!({"n": 5})) })
            .await
            .unwrap();
        assert_eq!(*value, json!({"n": 5}));

        // Second call must not re-run the closure.
        let value = cache
            .get_or_compute("k", TTL_SHORT, || async { panic!("recomputed") })
            .await
            .unwrap();
        assert_eq!(*value, json!({"n": 5}));
    }
}
