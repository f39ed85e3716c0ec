use anyhow::Result;
use tracing::debug;

use crate::db::{self, model::FieldValue, EntityFields, Pool};
use crate::model::EntityKind;

use super::mapper::MappedEntity;

/// Translates remote ids into local ids through the tracking store. A
/// reference to a record that has not been synced yet resolves to null.
#[derive(Clone, Copy)]
pub struct ReferenceResolver<'a> {
    pool: &'a Pool,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    pub async fn resolve(&self, kind: EntityKind, external_id: i64) -> Result<Option<i64>> {
        db::tracked_local_id(self.pool, kind, external_id).await
    }

    /// Fold resolved references into the mapped columns.
    pub async fn apply(&self, mapped: MappedEntity) -> Result<EntityFields> {
        let MappedEntity {
            mut fields,
            references,
        } = mapped;
        for reference in references {
            let local_id = match reference.external_id {
                Some(external_id) => {
                    let local_id = self.resolve(reference.target, external_id).await?;
                    if local_id.is_none() {
                        debug!(
                            target_kind = reference.target.as_str(),
                            external_id, "reference not synced yet; storing null"
                        );
                    }
                    local_id
                }
                None => None,
            };
            fields.insert(reference.column, FieldValue::from(local_id));
        }
        Ok(fields)
    }
}
