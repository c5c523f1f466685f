//! Web API module for the analytics dashboard.

pub mod admin;
pub mod error;
pub mod grades;
pub mod holidays;
pub mod logs;
pub mod overview;
pub mod routes;
pub mod status;
pub mod stream;
pub mod students;
pub mod teachers;
pub mod timespent;
pub mod years;

pub use routes::*;
