use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use catalog_mirror::catalog::CatalogClient;
use catalog_mirror::config;
use catalog_mirror::db;
use catalog_mirror::model::{EntityKind, SyncReport};
use catalog_mirror::sync::Synchronizer;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Mirror the remote catalog into the local database and print the counts"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Sync a single kind (e.g. organizations, people, news) instead of everything
    #[arg(long)]
    kind: Option<EntityKind>,

    /// Print how many records of each kind are tracked and exit
    #[arg(long, conflicts_with = "kind")]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/catalog.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    if args.status {
        let summary = db::tracking_summary(&pool).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let client = CatalogClient::from_config(&cfg)?;
    let synchronizer = Synchronizer::new(pool, client, cfg.sync_settings());

    let report = match args.kind {
        Some(kind) => {
            info!(kind = kind.as_str(), "syncing one kind");
            let mut report = SyncReport::default();
            report.push(kind, synchronizer.run_once(kind).await);
            report
        }
        None => {
            info!("syncing all kinds");
            synchronizer.run_all().await
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
