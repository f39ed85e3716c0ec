use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Entity types mirrored from the remote catalog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    Person,
    Backer,
    Collaborator,
    Announcement,
    Occasion,
    Account,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Organization,
        EntityKind::Person,
        EntityKind::Backer,
        EntityKind::Collaborator,
        EntityKind::Announcement,
        EntityKind::Occasion,
        EntityKind::Account,
    ];

    /// Order used by a full sync. People and announcements reference
    /// organizations and accounts reference people and backers, so
    /// referenced kinds must come first.
    pub const SYNC_ORDER: [EntityKind; 7] = [
        EntityKind::Organization,
        EntityKind::Person,
        EntityKind::Backer,
        EntityKind::Collaborator,
        EntityKind::Announcement,
        EntityKind::Occasion,
        EntityKind::Account,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Organization => "organization",
            EntityKind::Person => "person",
            EntityKind::Backer => "backer",
            EntityKind::Collaborator => "collaborator",
            EntityKind::Announcement => "announcement",
            EntityKind::Occasion => "occasion",
            EntityKind::Account => "account",
        }
    }

    /// Plural name, used for table names, default list paths and report keys.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Organization => "organizations",
            EntityKind::Person => "people",
            EntityKind::Backer => "backers",
            EntityKind::Collaborator => "collaborators",
            EntityKind::Announcement => "announcements",
            EntityKind::Occasion => "occasions",
            EntityKind::Account => "accounts",
        }
    }

    /// Accepts singular and plural names plus the upstream synonyms
    /// (founder, investor, partner, news, event, user).
    pub fn parse_kind(s: &str) -> Option<Self> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "organization" | "organizations" => EntityKind::Organization,
            "person" | "people" | "founder" | "founders" => EntityKind::Person,
            "backer" | "backers" | "investor" | "investors" => EntityKind::Backer,
            "collaborator" | "collaborators" | "partner" | "partners" => EntityKind::Collaborator,
            "announcement" | "announcements" | "news" => EntityKind::Announcement,
            "occasion" | "occasions" | "event" | "events" => EntityKind::Occasion,
            "account" | "accounts" | "user" | "users" => EntityKind::Account,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::parse_kind(s).ok_or_else(|| format!("unknown entity kind '{}'", s))
    }
}

/// How a single remote item was classified by a sync routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Imported,
    Updated,
    /// Saved again but no tracked field changed.
    Unchanged,
    /// The tracked modification time was at least as new as the listed one.
    Stale,
    /// The detail endpoint answered "not modified".
    NotModified,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCounts {
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl SyncCounts {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Imported => self.imported += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Unchanged | ItemOutcome::Stale | ItemOutcome::NotModified => {
                self.skipped += 1
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.imported + self.updated + self.skipped
    }
}

/// Per-kind counts of a full sync, kept in the order the kinds ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    entries: Vec<(EntityKind, SyncCounts)>,
}

impl SyncReport {
    pub fn push(&mut self, kind: EntityKind, counts: SyncCounts) {
        self.entries.push((kind, counts));
    }

    pub fn get(&self, kind: EntityKind) -> Option<SyncCounts> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, counts)| *counts)
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        self.entries.iter().map(|(kind, _)| *kind).collect()
    }

    pub fn total(&self) -> SyncCounts {
        self.entries
            .iter()
            .fold(SyncCounts::default(), |acc, (_, c)| SyncCounts {
                imported: acc.imported + c.imported,
                updated: acc.updated + c.updated,
                skipped: acc.skipped + c.skipped,
            })
    }
}

impl Serialize for SyncReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (kind, counts) in &self.entries {
            map.serialize_entry(kind.plural(), counts)?;
        }
        map.end()
    }
}
