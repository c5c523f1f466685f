//! Data access layer: query modules per source system plus shared helpers.

pub mod activity;
pub mod correlation;
pub mod courses;
pub mod grades;
pub mod holidays;
pub mod ids;
pub mod kv;
pub mod logs;
pub mod overview;
pub mod students;
pub mod teachers;
pub mod timespent;
