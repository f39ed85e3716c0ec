//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: column schemas, tracking records and stored entity rows.
//! - `repo`: SQL-only functions that map rows into those models.
//!
//! External modules should import from `catalog_mirror::db`; the repository
//! API and commonly used models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{EntityFields, EntityRow, FieldValue, TrackingRecord, TrackingSummary};
