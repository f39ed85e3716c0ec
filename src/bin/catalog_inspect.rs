use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use catalog_mirror::catalog::{pagination, CatalogClient};
use catalog_mirror::config;
use catalog_mirror::model::EntityKind;

/// Fetch one list page of a kind and show how it paginates.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Kind to inspect
    #[arg(long)]
    kind: EntityKind,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let settings = cfg.sync_settings();
    let url = settings
        .list_url(args.kind)
        .ok_or_else(|| anyhow!("catalog.base_url is not configured"))??;
    let client = CatalogClient::from_config(&cfg)?;

    let page = pagination::fetch_page(&client, &url)
        .await
        .ok_or_else(|| anyhow!("no usable page at {}", url))?;
    println!("URL: {}", url);
    println!("Shape: {:?}", page.shape);
    println!("Items: {}", page.items.len());
    match &page.next {
        Some(next) => println!("Next: {}", next),
        None => println!("Next: (none)"),
    }
    if let Some(first) = page.items.first() {
        println!("First item:\n{}", serde_json::to_string_pretty(first)?);
    }
    Ok(())
}
