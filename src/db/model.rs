//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::EntityKind;

/// Storage type of an entity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Text,
    }
}

const fn integer(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Integer,
    }
}

const fn timestamp(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Timestamp,
    }
}

const ORGANIZATION_COLUMNS: &[Column] = &[
    text("name"),
    text("description"),
    text("website"),
    text("category"),
    text("logo_url"),
    timestamp("founded_on"),
    text("email"),
];

const PERSON_COLUMNS: &[Column] = &[
    text("name"),
    text("email"),
    text("title"),
    text("bio"),
    integer("organization_id"),
];

const BACKER_COLUMNS: &[Column] = &[
    text("name"),
    text("backer_type"),
    text("website"),
    text("description"),
    text("email"),
];

const COLLABORATOR_COLUMNS: &[Column] = &[
    text("name"),
    text("category"),
    text("website"),
    text("description"),
    text("logo_url"),
];

const ANNOUNCEMENT_COLUMNS: &[Column] = &[
    text("title"),
    text("body"),
    text("url"),
    timestamp("published_at"),
    integer("organization_id"),
];

const OCCASION_COLUMNS: &[Column] = &[
    text("title"),
    text("description"),
    text("location"),
    text("url"),
    timestamp("starts_at"),
    timestamp("ends_at"),
];

const ACCOUNT_COLUMNS: &[Column] = &[
    text("email"),
    text("display_name"),
    text("role"),
    integer("person_id"),
    integer("backer_id"),
];

/// Table name of the local entity for `kind`.
pub fn table_name(kind: EntityKind) -> &'static str {
    kind.plural()
}

/// Mirrored columns of `kind`, excluding `id`, `external_id` and audit columns.
pub fn columns(kind: EntityKind) -> &'static [Column] {
    match kind {
        EntityKind::Organization => ORGANIZATION_COLUMNS,
        EntityKind::Person => PERSON_COLUMNS,
        EntityKind::Backer => BACKER_COLUMNS,
        EntityKind::Collaborator => COLLABORATOR_COLUMNS,
        EntityKind::Announcement => ANNOUNCEMENT_COLUMNS,
        EntityKind::Occasion => OCCASION_COLUMNS,
        EntityKind::Account => ACCOUNT_COLUMNS,
    }
}

pub fn column(kind: EntityKind, name: &str) -> Option<Column> {
    columns(kind).iter().copied().find(|c| c.name == name)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<Option<String>> for FieldValue {
    fn from(value: Option<String>) -> Self {
        value.map(FieldValue::Text).unwrap_or(FieldValue::Null)
    }
}

impl From<Option<i64>> for FieldValue {
    fn from(value: Option<i64>) -> Self {
        value.map(FieldValue::Integer).unwrap_or(FieldValue::Null)
    }
}

impl From<Option<DateTime<Utc>>> for FieldValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map(FieldValue::Timestamp).unwrap_or(FieldValue::Null)
    }
}

/// Column name to value. Only the columns present are written on update.
pub type EntityFields = BTreeMap<&'static str, FieldValue>;

/// A stored local entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub id: i64,
    pub external_id: Option<i64>,
    pub fields: EntityFields,
}

impl EntityRow {
    /// Value of `name`, with absent columns reading as null.
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Null)
    }
}

/// Per (kind, external id) sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingRecord {
    pub kind: EntityKind,
    pub external_id: i64,
    pub local_id: Option<i64>,
    pub cache_validator: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Tracked row count per kind, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSummary {
    pub kind: EntityKind,
    pub tracked: i64,
    pub last_fetched_at: Option<DateTime<Utc>>,
}
