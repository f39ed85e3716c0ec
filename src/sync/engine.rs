use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::{self, pagination, CatalogService, DetailFetch};
use crate::config::KindEndpoints;
use crate::db::{self, EntityFields, EntityRow, Pool, TrackingRecord};
use crate::model::{EntityKind, ItemOutcome, SyncCounts};

use super::mapper;
use super::resolver::ReferenceResolver;

/// Everything a sync routine needs to know about the remote side.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Without a base URL every routine returns zero counts.
    pub base_url: Option<Url>,
    pub endpoints: BTreeMap<EntityKind, KindEndpoints>,
    /// Constant pause after each fully processed item.
    pub item_delay: Duration,
}

impl SyncSettings {
    pub fn new(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            endpoints: EntityKind::ALL
                .iter()
                .map(|kind| (*kind, KindEndpoints::defaults(*kind)))
                .collect(),
            item_delay: Duration::ZERO,
        }
    }

    fn endpoints(&self, kind: EntityKind) -> KindEndpoints {
        self.endpoints
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| KindEndpoints::defaults(kind))
    }

    fn join(&self, path: &str) -> Option<Result<Url>> {
        let base = self.base_url.as_ref()?;
        Some(
            base.join(path.trim_start_matches('/'))
                .with_context(|| format!("invalid path {} for base {}", path, base)),
        )
    }

    /// First list page of `kind`; `None` when no base URL is configured.
    pub fn list_url(&self, kind: EntityKind) -> Option<Result<Url>> {
        self.join(&self.endpoints(kind).list_path)
    }

    /// Detail resource of one record; `None` when unconfigured.
    pub fn detail_url(&self, kind: EntityKind, external_id: i64) -> Option<Result<Url>> {
        let template = self.endpoints(kind).detail_path?;
        self.join(&template.replace("{id}", &external_id.to_string()))
    }
}

/// Runs sync routines against one catalog and one local store.
pub struct Synchronizer<S> {
    pool: Pool,
    api: S,
    settings: SyncSettings,
}

impl<S: CatalogService> Synchronizer<S> {
    pub fn new(pool: Pool, api: S, settings: SyncSettings) -> Self {
        Self {
            pool,
            api,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn resolver(&self) -> ReferenceResolver<'_> {
        ReferenceResolver::new(&self.pool)
    }

    /// Sync every listed record of `kind`. Per-item failures are logged and
    /// skipped; a failed list page ends the run with the counts so far.
    #[instrument(skip_all, fields(kind = kind.as_str(), run_id = %Uuid::new_v4()))]
    pub async fn run_once(&self, kind: EntityKind) -> SyncCounts {
        let mut counts = SyncCounts::default();
        let list_url = match self.settings.list_url(kind) {
            None => {
                info!("no catalog base_url configured; nothing to sync");
                return counts;
            }
            Some(Err(err)) => {
                error!(?err, "cannot build list URL");
                return counts;
            }
            Some(Ok(url)) => url,
        };

        info!(%list_url, "sync started");
        let mut items = pagination::list_items(&self.api, list_url);
        while let Some(raw) = items.next().await {
            let Some(external_id) = mapper::extract_external_id(&raw) else {
                warn!(item = %raw, "dropping item without a usable id");
                continue;
            };

            let outcome = match self.sync_item(kind, external_id, raw).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(?err, external_id, "failed to store item");
                    continue;
                }
            };
            debug!(external_id, ?outcome, "item synced");
            counts.record(outcome);

            let throttled = matches!(
                outcome,
                ItemOutcome::Imported | ItemOutcome::Updated | ItemOutcome::Unchanged
            );
            if throttled && !self.settings.item_delay.is_zero() {
                tokio::time::sleep(self.settings.item_delay).await;
            }
        }

        info!(
            imported = counts.imported,
            updated = counts.updated,
            skipped = counts.skipped,
            "sync finished"
        );
        counts
    }

    async fn sync_item(&self, kind: EntityKind, external_id: i64, listed: Value) -> Result<ItemOutcome> {
        let tracking = db::find_tracking(&self.pool, kind, external_id).await?;
        let known_modified = tracking.as_ref().and_then(|t| t.last_modified);
        let listed_modified = mapper::extract_modified(&listed);

        if let (Some(incoming), Some(known)) = (listed_modified, known_modified) {
            if known >= incoming {
                return Ok(ItemOutcome::Stale);
            }
        }

        let known_validator = tracking.as_ref().and_then(|t| t.cache_validator.clone());
        let (record, validator) = match self.settings.detail_url(kind, external_id) {
            None => (listed, known_validator),
            Some(Err(err)) => {
                warn!(?err, external_id, "cannot build detail URL; using list fields");
                (listed, known_validator)
            }
            Some(Ok(url)) => {
                match catalog::fetch_detail(&self.api, &url, known_validator.as_deref()).await {
                    DetailFetch::Fresh { body, validator } => (body, validator),
                    DetailFetch::NotModified => {
                        db::upsert_tracking(
                            &self.pool,
                            &TrackingRecord {
                                kind,
                                external_id,
                                local_id: tracking.as_ref().and_then(|t| t.local_id),
                                cache_validator: known_validator,
                                last_modified: newest(listed_modified, known_modified),
                                fetched_at: Utc::now(),
                            },
                        )
                        .await?;
                        return Ok(ItemOutcome::NotModified);
                    }
                    DetailFetch::Failed(reason) => {
                        warn!(external_id, %reason, "detail fetch failed; using list fields");
                        (listed, known_validator)
                    }
                }
            }
        };

        let incoming_modified = mapper::extract_modified(&record).or(listed_modified);
        let last_modified = newest(incoming_modified, known_modified);

        let mapped = mapper::map_record(kind, external_id, &record);
        let fields = self.resolver().apply(mapped).await?;

        let before = match tracking.as_ref().and_then(|t| t.local_id) {
            Some(local_id) => match db::find_entity(&self.pool, kind, local_id).await {
                Ok(row) => row,
                Err(err) => {
                    warn!(?err, local_id, "could not load previous state");
                    None
                }
            },
            None => None,
        };

        // Unchanged rows are not rewritten so their updated_at stays put.
        let outcome = classify(before.as_ref(), &fields);
        let local_id = match (&before, outcome) {
            (Some(row), ItemOutcome::Unchanged) => row.id,
            _ => db::upsert_entity_by_external_id(&self.pool, kind, external_id, &fields).await?,
        };
        db::upsert_tracking(
            &self.pool,
            &TrackingRecord {
                kind,
                external_id,
                local_id: Some(local_id),
                cache_validator: validator,
                last_modified,
                fetched_at: Utc::now(),
            },
        )
        .await?;

        Ok(outcome)
    }
}

fn newest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Imported without a previous row, updated if any saved column changed.
pub(crate) fn classify(before: Option<&EntityRow>, saved: &EntityFields) -> ItemOutcome {
    let Some(before) = before else {
        return ItemOutcome::Imported;
    };
    let changed = saved
        .iter()
        .any(|(column, value)| before.field(column) != value);
    if changed {
        ItemOutcome::Updated
    } else {
        ItemOutcome::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FieldValue;
    use chrono::TimeZone;

    fn row(name: &str) -> EntityRow {
        let mut fields = EntityFields::new();
        fields.insert("name", FieldValue::Text(name.into()));
        fields.insert("website", FieldValue::Null);
        EntityRow {
            id: 1,
            external_id: Some(7),
            fields,
        }
    }

    #[test]
    fn classify_compares_saved_columns() {
        let before = row("Acme");
        assert_eq!(classify(None, &before.fields), ItemOutcome::Imported);
        assert_eq!(classify(Some(&before), &before.fields), ItemOutcome::Unchanged);
        assert_eq!(
            classify(Some(&before), &row("Acme Corp").fields),
            ItemOutcome::Updated
        );

        let mut extra = before.fields.clone();
        extra.insert("category", FieldValue::Null);
        assert_eq!(classify(Some(&before), &extra), ItemOutcome::Unchanged);
        extra.insert("category", FieldValue::Text("fintech".into()));
        assert_eq!(classify(Some(&before), &extra), ItemOutcome::Updated);
    }

    #[test]
    fn newest_prefers_later_time() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(newest(Some(early), Some(late)), Some(late));
        assert_eq!(newest(None, Some(early)), Some(early));
        assert_eq!(newest(None, None), None);
    }

    #[test]
    fn urls_join_under_base() {
        let mut settings =
            SyncSettings::new(Some(Url::parse("https://catalog.test/api/").unwrap()));
        assert_eq!(
            settings.list_url(EntityKind::Person).unwrap().unwrap().as_str(),
            "https://catalog.test/api/people"
        );
        assert_eq!(
            settings
                .detail_url(EntityKind::Occasion, 12)
                .unwrap()
                .unwrap()
                .as_str(),
            "https://catalog.test/api/occasions/12"
        );

        settings.endpoints.insert(
            EntityKind::Occasion,
            KindEndpoints {
                list_path: "/events?per_page=50".into(),
                detail_path: None,
            },
        );
        assert_eq!(
            settings.list_url(EntityKind::Occasion).unwrap().unwrap().as_str(),
            "https://catalog.test/api/events?per_page=50"
        );
        assert!(settings.detail_url(EntityKind::Occasion, 12).is_none());

        assert!(SyncSettings::new(None).list_url(EntityKind::Account).is_none());
    }
}
