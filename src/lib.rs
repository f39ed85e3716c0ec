//! Incremental mirror of a paginated REST catalog into a local SQLite store.

pub mod catalog;
pub mod config;
pub mod db;
pub mod model;
pub mod sync;
