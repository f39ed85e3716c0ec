use super::model::{
    self, ColumnType, EntityFields, EntityRow, FieldValue, TrackingRecord, TrackingSummary,
};
use crate::model::EntityKind;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        // Enable WAL and stricter durability.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open database")?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// --- sync tracking -------------------------------------------------------

#[instrument(skip_all, fields(kind = kind.as_str(), external_id = external_id))]
pub async fn find_tracking(
    pool: &Pool,
    kind: EntityKind,
    external_id: i64,
) -> Result<Option<TrackingRecord>> {
    let row = sqlx::query(
        "SELECT local_id, cache_validator, last_modified, fetched_at \
         FROM sync_tracking WHERE entity_kind = ? AND external_id = ?",
    )
    .bind(kind.as_str())
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(TrackingRecord {
        kind,
        external_id,
        local_id: row.try_get("local_id")?,
        cache_validator: row.try_get("cache_validator")?,
        last_modified: row.try_get("last_modified")?,
        fetched_at: row.try_get("fetched_at")?,
    }))
}

/// Insert or replace the tracking row for `(kind, external_id)`. A null
/// `local_id` never erases one that is already known.
#[instrument(skip_all, fields(kind = record.kind.as_str(), external_id = record.external_id))]
pub async fn upsert_tracking(pool: &Pool, record: &TrackingRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_tracking \
            (entity_kind, external_id, local_id, cache_validator, last_modified, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(entity_kind, external_id) DO UPDATE SET \
            local_id = COALESCE(excluded.local_id, sync_tracking.local_id), \
            cache_validator = excluded.cache_validator, \
            last_modified = excluded.last_modified, \
            fetched_at = excluded.fetched_at",
    )
    .bind(record.kind.as_str())
    .bind(record.external_id)
    .bind(record.local_id)
    .bind(record.cache_validator.as_deref())
    .bind(record.last_modified)
    .bind(record.fetched_at)
    .execute(pool)
    .await
    .context("failed to persist tracking record")?;
    Ok(())
}

/// Local id recorded for a remote record, if it has been saved.
#[instrument(skip_all, fields(kind = kind.as_str(), external_id = external_id))]
pub async fn tracked_local_id(
    pool: &Pool,
    kind: EntityKind,
    external_id: i64,
) -> Result<Option<i64>> {
    let id: Option<Option<i64>> = sqlx::query_scalar(
        "SELECT local_id FROM sync_tracking WHERE entity_kind = ? AND external_id = ?",
    )
    .bind(kind.as_str())
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(id.flatten())
}

#[instrument(skip_all)]
pub async fn tracking_summary(pool: &Pool) -> Result<Vec<TrackingSummary>> {
    let rows = sqlx::query(
        "SELECT entity_kind, COUNT(*) AS tracked, MAX(fetched_at) AS last_fetched_at \
         FROM sync_tracking GROUP BY entity_kind",
    )
    .fetch_all(pool)
    .await?;

    let mut summary = Vec::with_capacity(rows.len());
    for row in rows {
        let kind_str: String = row.try_get("entity_kind")?;
        let Some(kind) = EntityKind::parse_kind(&kind_str) else {
            debug!(kind = %kind_str, "ignoring tracking rows of unknown kind");
            continue;
        };
        let last_fetched_at = row
            .try_get::<Option<String>, _>("last_fetched_at")?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        summary.push(TrackingSummary {
            kind,
            tracked: row.try_get("tracked")?,
            last_fetched_at,
        });
    }
    summary.sort_by_key(|s| s.kind);
    Ok(summary)
}

// --- entity repositories -------------------------------------------------

fn bind_value<'q>(query: SqliteQuery<'q>, value: &FieldValue) -> SqliteQuery<'q> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Text(s) => query.bind(s.clone()),
        FieldValue::Integer(i) => query.bind(*i),
        FieldValue::Timestamp(t) => query.bind(*t),
    }
}

/// Reject columns the kind does not declare; their names end up in SQL.
fn checked_columns<'f>(
    kind: EntityKind,
    fields: &'f EntityFields,
) -> Result<Vec<(&'static str, &'f FieldValue)>> {
    fields
        .iter()
        .map(|(name, value)| {
            model::column(kind, name)
                .map(|c| (c.name, value))
                .ok_or_else(|| anyhow!("{} has no column '{}'", kind, name))
        })
        .collect()
}

fn select_sql(kind: EntityKind, filter: &str) -> String {
    let cols: Vec<&str> = model::columns(kind).iter().map(|c| c.name).collect();
    format!(
        "SELECT id, external_id, {} FROM {} WHERE {} = ?",
        cols.join(", "),
        model::table_name(kind),
        filter
    )
}

fn decode_row(kind: EntityKind, row: &SqliteRow) -> Result<EntityRow> {
    let mut fields = EntityFields::new();
    for column in model::columns(kind) {
        let value = match column.ty {
            ColumnType::Text => row.try_get::<Option<String>, _>(column.name)?.into(),
            ColumnType::Integer => row.try_get::<Option<i64>, _>(column.name)?.into(),
            ColumnType::Timestamp => row
                .try_get::<Option<DateTime<Utc>>, _>(column.name)?
                .into(),
        };
        fields.insert(column.name, value);
    }
    Ok(EntityRow {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        fields,
    })
}

#[instrument(skip_all, fields(kind = kind.as_str(), id = id))]
pub async fn find_entity(pool: &Pool, kind: EntityKind, id: i64) -> Result<Option<EntityRow>> {
    let sql = select_sql(kind, "id");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.map(|r| decode_row(kind, &r)).transpose()
}

#[instrument(skip_all, fields(kind = kind.as_str(), external_id = external_id))]
pub async fn find_entity_by_external_id(
    pool: &Pool,
    kind: EntityKind,
    external_id: i64,
) -> Result<Option<EntityRow>> {
    let sql = select_sql(kind, "external_id");
    let row = sqlx::query(&sql)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| decode_row(kind, &r)).transpose()
}

#[instrument(skip_all, fields(kind = kind.as_str()))]
pub async fn create_entity(
    pool: &Pool,
    kind: EntityKind,
    external_id: Option<i64>,
    fields: &EntityFields,
) -> Result<i64> {
    let columns = checked_columns(kind, fields)?;
    let mut names = vec!["external_id"];
    names.extend(columns.iter().map(|(name, _)| *name));
    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
        model::table_name(kind),
        names.join(", "),
        placeholders
    );

    let mut query = sqlx::query(&sql).bind(external_id);
    for (_, value) in &columns {
        query = bind_value(query, value);
    }
    let row = query
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to create {}", kind))?;
    Ok(row.try_get("id")?)
}

/// Overwrite the given columns of an existing row; other columns keep their
/// values. Returns false if no row has `id`.
#[instrument(skip_all, fields(kind = kind.as_str(), id = id))]
pub async fn update_entity(
    pool: &Pool,
    kind: EntityKind,
    id: i64,
    fields: &EntityFields,
) -> Result<bool> {
    let columns = checked_columns(kind, fields)?;
    let mut assignments: Vec<String> = columns
        .iter()
        .map(|(name, _)| format!("{} = ?", name))
        .collect();
    assignments.push("updated_at = CURRENT_TIMESTAMP".to_string());
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        model::table_name(kind),
        assignments.join(", ")
    );

    let mut query = sqlx::query(&sql);
    for (_, value) in &columns {
        query = bind_value(query, value);
    }
    let result = query
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to update {} {}", kind, id))?;
    Ok(result.rows_affected() > 0)
}

#[instrument(skip_all, fields(kind = kind.as_str(), id = id))]
pub async fn delete_entity(pool: &Pool, kind: EntityKind, id: i64) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?", model::table_name(kind));
    let result = sqlx::query(&sql).bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Create the entity for `external_id`, or merge `fields` onto the row that
/// already carries it. Returns the local id.
#[instrument(skip_all, fields(kind = kind.as_str(), external_id = external_id))]
pub async fn upsert_entity_by_external_id(
    pool: &Pool,
    kind: EntityKind,
    external_id: i64,
    fields: &EntityFields,
) -> Result<i64> {
    match find_entity_by_external_id(pool, kind, external_id).await? {
        Some(existing) => {
            update_entity(pool, kind, existing.id, fields).await?;
            Ok(existing.id)
        }
        None => create_entity(pool, kind, Some(external_id), fields).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn org_fields(name: &str) -> EntityFields {
        let mut fields = EntityFields::new();
        fields.insert("name", FieldValue::Text(name.into()));
        fields.insert(
            "founded_on",
            FieldValue::Timestamp(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap()),
        );
        fields
    }

    #[test]
    fn prepare_sqlite_url_keeps_memory_urls() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn prepare_sqlite_url_creates_parent_dir() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("mirror.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(td.path().join("nested").exists());
    }

    #[tokio::test]
    async fn upsert_entity_creates_then_merges() {
        let pool = setup_pool().await;
        let id = upsert_entity_by_external_id(&pool, EntityKind::Organization, 7, &org_fields("Acme"))
            .await
            .unwrap();

        let mut patch = EntityFields::new();
        patch.insert("website", FieldValue::Text("https://acme.test".into()));
        let again = upsert_entity_by_external_id(&pool, EntityKind::Organization, 7, &patch)
            .await
            .unwrap();
        assert_eq!(id, again);

        let row = find_entity(&pool, EntityKind::Organization, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.external_id, Some(7));
        assert_eq!(row.field("name"), &FieldValue::Text("Acme".into()));
        assert_eq!(row.field("website"), &FieldValue::Text("https://acme.test".into()));
        assert_eq!(
            row.field("founded_on"),
            &FieldValue::Timestamp(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap())
        );
        assert!(row.field("category").is_null());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let pool = setup_pool().await;
        let mut fields = org_fields("Acme");
        fields.insert("menu", FieldValue::Text("x".into()));
        let err = create_entity(&pool, EntityKind::Organization, None, &fields)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("menu"));
    }

    #[tokio::test]
    async fn delete_entity_reports_missing_rows() {
        let pool = setup_pool().await;
        let id = create_entity(&pool, EntityKind::Organization, None, &org_fields("Solo"))
            .await
            .unwrap();
        assert!(delete_entity(&pool, EntityKind::Organization, id).await.unwrap());
        assert!(!delete_entity(&pool, EntityKind::Organization, id).await.unwrap());
        assert!(find_entity(&pool, EntityKind::Organization, id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn tracking_upsert_is_keyed_by_kind_and_external_id() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let mut record = TrackingRecord {
            kind: EntityKind::Backer,
            external_id: 3,
            local_id: Some(11),
            cache_validator: Some("\"v1\"".into()),
            last_modified: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            fetched_at: now,
        };
        upsert_tracking(&pool, &record).await.unwrap();

        record.local_id = None;
        record.cache_validator = Some("\"v2\"".into());
        upsert_tracking(&pool, &record).await.unwrap();

        let stored = find_tracking(&pool, EntityKind::Backer, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.local_id, Some(11));
        assert_eq!(stored.cache_validator.as_deref(), Some("\"v2\""));
        assert_eq!(stored.last_modified, record.last_modified);

        assert_eq!(
            tracked_local_id(&pool, EntityKind::Backer, 3).await.unwrap(),
            Some(11)
        );
        assert_eq!(
            tracked_local_id(&pool, EntityKind::Organization, 3).await.unwrap(),
            None
        );

        let summary = tracking_summary(&pool).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].kind, EntityKind::Backer);
        assert_eq!(summary[0].tracked, 1);
    }
}
