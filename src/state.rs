//! Application state shared across the web surface and background sync.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::AnalyticsCache;
use crate::config::Config;
use crate::db::Databases;
use crate::leaf::LeafApi;

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    /// Returns a snapshot of all service statuses.
    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.clone()))
            .collect()
    }
}

/// Analytics tuning pulled out of [`Config`] so handlers don't carry the
/// full config around.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsSettings {
    /// School hours as minutes from midnight, JST.
    pub school_start_minutes: u32,
    pub school_end_minutes: u32,
    /// Longest statement gap still counted as one session (seconds).
    pub max_session_duration: i64,
    /// Cap applied to a single statement gap (seconds).
    pub max_activity_duration: i64,
}

impl AnalyticsSettings {
    pub fn from_config(config: &Config) -> Self {
        let (school_start_minutes, school_end_minutes) = config.school_window_minutes();
        Self {
            school_start_minutes,
            school_end_minutes,
            max_session_duration: config.max_session_duration,
            max_activity_duration: config.max_activity_duration,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Databases,
    pub cache: AnalyticsCache,
    pub leaf_api: Option<Arc<LeafApi>>,
    pub service_statuses: ServiceStatusRegistry,
    pub settings: AnalyticsSettings,
}

impl AppState {
    pub fn new(db: Databases, leaf_api: Option<Arc<LeafApi>>, config: &Config) -> Self {
        Self {
            db,
            cache: AnalyticsCache::new(),
            leaf_api,
            service_statuses: ServiceStatusRegistry::new(),
            settings: AnalyticsSettings::from_config(config),
        }
    }
}
