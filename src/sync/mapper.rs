//! Remote record -> local column values.
//!
//! Mappers are pure and total: every required column gets a fallback, each
//! concept is looked up under several upstream spellings (first present
//! wins), and dates that do not parse become null. Cross-entity references
//! are returned unresolved; the sync routine turns them into local ids.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::db::model::{EntityFields, FieldValue};
use crate::model::EntityKind;

pub const UNNAMED: &str = "Unnamed";
pub const UNTITLED: &str = "Untitled";
pub const DEFAULT_ROLE: &str = "member";

const ID_KEYS: &[&str] = &["id", "api_id"];
const MODIFIED_KEYS: &[&str] = &["updated_at", "updatedAt", "modified_at"];
const CATEGORY_KEYS: &[&str] = &["type", "category", "focus"];
const WEBSITE_KEYS: &[&str] = &["website", "url", "homepage"];
const LOGO_KEYS: &[&str] = &["logo_url", "logoUrl", "logo"];
const DESCRIPTION_KEYS: &[&str] = &["description", "summary", "about"];
const EMAIL_KEYS: &[&str] = &["email", "contact_email", "contactEmail"];

/// A foreign key still expressed in remote ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub column: &'static str,
    pub target: EntityKind,
    pub external_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedEntity {
    pub fields: EntityFields,
    pub references: Vec<Reference>,
}

/// Look up a possibly dotted path such as `organization.id`.
fn lookup<'v>(raw: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .try_fold(raw, |value, key| value.get(key))
        .filter(|v| !v.is_null())
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| lookup(raw, k).and_then(as_text))
}

fn first_id(raw: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| lookup(raw, k).and_then(as_id))
}

fn first_timestamp(raw: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| lookup(raw, k).and_then(parse_timestamp))
}

/// External id from `id` or `api_id`, as a number or numeric string.
pub fn extract_external_id(raw: &Value) -> Option<i64> {
    first_id(raw, ID_KEYS)
}

/// Modification time from `updated_at`, `updatedAt` or `modified_at`.
pub fn extract_modified(raw: &Value) -> Option<DateTime<Utc>> {
    first_timestamp(raw, MODIFIED_KEYS)
}

/// Parse RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS` (UTC), `YYYY-MM-DD` (midnight
/// UTC) or unix seconds. Anything else is `None`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Deterministic stand-in for a missing email so re-runs compare equal.
pub fn placeholder_email(kind: EntityKind, external_id: i64) -> String {
    format!("unknown+{}-{}@placeholder.invalid", kind.as_str(), external_id)
}

fn person_name(raw: &Value) -> Option<String> {
    first_text(raw, &["name", "full_name", "fullName"]).or_else(|| {
        let first = first_text(raw, &["first_name", "firstName"]);
        let last = first_text(raw, &["last_name", "lastName"]);
        match (first, last) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (f, l) => f.or(l),
        }
    })
}

struct Builder {
    fields: EntityFields,
    references: Vec<Reference>,
}

impl Builder {
    fn new() -> Self {
        Self {
            fields: EntityFields::new(),
            references: Vec::new(),
        }
    }

    fn text(mut self, column: &'static str, value: Option<String>) -> Self {
        self.fields.insert(column, value.into());
        self
    }

    fn required(mut self, column: &'static str, value: Option<String>, fallback: &str) -> Self {
        let value = value.unwrap_or_else(|| fallback.to_string());
        self.fields.insert(column, FieldValue::Text(value));
        self
    }

    fn timestamp(mut self, column: &'static str, value: Option<DateTime<Utc>>) -> Self {
        self.fields.insert(column, value.into());
        self
    }

    fn reference(mut self, column: &'static str, target: EntityKind, external_id: Option<i64>) -> Self {
        self.references.push(Reference {
            column,
            target,
            external_id,
        });
        self
    }

    fn build(self) -> MappedEntity {
        MappedEntity {
            fields: self.fields,
            references: self.references,
        }
    }
}

/// Map a raw remote record of `kind` to local column values.
pub fn map_record(kind: EntityKind, external_id: i64, raw: &Value) -> MappedEntity {
    match kind {
        EntityKind::Organization => map_organization(raw),
        EntityKind::Person => map_person(external_id, raw),
        EntityKind::Backer => map_backer(raw),
        EntityKind::Collaborator => map_collaborator(raw),
        EntityKind::Announcement => map_announcement(raw),
        EntityKind::Occasion => map_occasion(raw),
        EntityKind::Account => map_account(external_id, raw),
    }
}

fn map_organization(raw: &Value) -> MappedEntity {
    Builder::new()
        .required("name", first_text(raw, &["name", "title"]), UNNAMED)
        .text("description", first_text(raw, DESCRIPTION_KEYS))
        .text("website", first_text(raw, WEBSITE_KEYS))
        .text("category", first_text(raw, CATEGORY_KEYS))
        .text("logo_url", first_text(raw, LOGO_KEYS))
        .timestamp(
            "founded_on",
            first_timestamp(raw, &["founded_on", "foundedOn", "founded_at"]),
        )
        .text("email", first_text(raw, EMAIL_KEYS))
        .build()
}

fn map_person(external_id: i64, raw: &Value) -> MappedEntity {
    Builder::new()
        .required("name", person_name(raw), UNNAMED)
        .required(
            "email",
            first_text(raw, EMAIL_KEYS),
            &placeholder_email(EntityKind::Person, external_id),
        )
        .text("title", first_text(raw, &["title", "role", "position"]))
        .text("bio", first_text(raw, &["bio", "biography", "description"]))
        .reference(
            "organization_id",
            EntityKind::Organization,
            first_id(
                raw,
                &["organization_id", "organizationId", "company_id", "organization.id"],
            ),
        )
        .build()
}

fn map_backer(raw: &Value) -> MappedEntity {
    Builder::new()
        .required("name", first_text(raw, &["name", "title"]), UNNAMED)
        .text("backer_type", first_text(raw, CATEGORY_KEYS))
        .text("website", first_text(raw, WEBSITE_KEYS))
        .text("description", first_text(raw, DESCRIPTION_KEYS))
        .text("email", first_text(raw, EMAIL_KEYS))
        .build()
}

fn map_collaborator(raw: &Value) -> MappedEntity {
    Builder::new()
        .required("name", first_text(raw, &["name", "title"]), UNNAMED)
        .text("category", first_text(raw, CATEGORY_KEYS))
        .text("website", first_text(raw, WEBSITE_KEYS))
        .text("description", first_text(raw, DESCRIPTION_KEYS))
        .text("logo_url", first_text(raw, LOGO_KEYS))
        .build()
}

fn map_announcement(raw: &Value) -> MappedEntity {
    Builder::new()
        .required("title", first_text(raw, &["title", "headline", "name"]), UNTITLED)
        .text("body", first_text(raw, &["body", "content", "summary"]))
        .text("url", first_text(raw, &["url", "link"]))
        .timestamp(
            "published_at",
            first_timestamp(raw, &["published_at", "publishedAt", "date"]),
        )
        .reference(
            "organization_id",
            EntityKind::Organization,
            first_id(
                raw,
                &["organization_id", "organizationId", "company_id", "organization.id"],
            ),
        )
        .build()
}

fn map_occasion(raw: &Value) -> MappedEntity {
    Builder::new()
        .required("title", first_text(raw, &["title", "name"]), UNTITLED)
        .text("description", first_text(raw, DESCRIPTION_KEYS))
        .text("location", first_text(raw, &["location", "venue", "place"]))
        .text("url", first_text(raw, &["url", "link", "registration_url"]))
        .timestamp(
            "starts_at",
            first_timestamp(raw, &["starts_at", "startsAt", "start_date", "date"]),
        )
        .timestamp(
            "ends_at",
            first_timestamp(raw, &["ends_at", "endsAt", "end_date"]),
        )
        .build()
}

fn map_account(external_id: i64, raw: &Value) -> MappedEntity {
    Builder::new()
        .required(
            "email",
            first_text(raw, EMAIL_KEYS),
            &placeholder_email(EntityKind::Account, external_id),
        )
        .required(
            "display_name",
            first_text(raw, &["display_name", "displayName", "username", "name"]),
            UNNAMED,
        )
        .required("role", first_text(raw, &["role"]), DEFAULT_ROLE)
        .reference(
            "person_id",
            EntityKind::Person,
            first_id(raw, &["person_id", "personId", "founder_id"]),
        )
        .reference(
            "backer_id",
            EntityKind::Backer,
            first_id(raw, &["backer_id", "backerId", "investor_id"]),
        )
        .build()
}
