//! LEAF School learning-analytics API service.
//!
//! Aggregates a Moodle LMS, the BookRoll e-reader stores, two ClickHouse
//! statement warehouses, and a Benesse grade database into one JSON API
//! with a live-activity WebSocket feed.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod db;
pub mod leaf;
pub mod logging;
pub mod state;
pub mod sync;
pub mod warehouse;
pub mod web;
