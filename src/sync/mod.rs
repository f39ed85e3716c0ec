//! Synchronisation engine: per-kind routines and the orchestrator that runs
//! them in dependency order.
//!
//! Execution is strictly sequential. Each item is listed, optionally
//! refreshed through its detail endpoint, mapped and stored before the next
//! one is touched, and kinds run one after another. Requests are bounded
//! only by the client timeout, if one is configured.

use tracing::{info, instrument};

use crate::catalog::CatalogService;
use crate::model::{EntityKind, SyncReport};

pub mod engine;
pub mod mapper;
pub mod resolver;

pub use engine::{SyncSettings, Synchronizer};
pub use resolver::ReferenceResolver;

impl<S: CatalogService> Synchronizer<S> {
    /// Run every kind of [`EntityKind::SYNC_ORDER`], in order, and collect
    /// their counts. Referenced kinds run first so references resolve.
    #[instrument(skip_all)]
    pub async fn run_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for kind in EntityKind::SYNC_ORDER {
            let counts = self.run_once(kind).await;
            report.push(kind, counts);
        }
        let total = report.total();
        info!(
            imported = total.imported,
            updated = total.updated,
            skipped = total.skipped,
            "full sync finished"
        );
        report
    }
}
