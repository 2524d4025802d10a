use anyhow::Context;
use bson::Document;
use sightings_loader::config::LoaderConfig;
use sightings_store::{BulkWriter, MongoStore, SightingStore};

const REPORTED_ERRORS: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = LoaderConfig::load(std::env::args().nth(1))?;

    let store = MongoStore::connect(&config.store_config())
        .await
        .context("failed to connect to document store")?;
    let existing = store
        .count(Document::new(), None)
        .await
        .context("failed to count existing documents")?;
    tracing::info!(collection = %store.collection_name(), existing, "connected to document store");

    if config.truncate {
        let deleted = store
            .delete_all()
            .await
            .context("failed to truncate collection")?;
        tracing::info!(deleted, "collection truncated");
    }

    let records = sightings_loader::read_records(&config.file)
        .with_context(|| format!("failed to load export {}", config.file.display()))?;
    tracing::info!(records = records.len(), file = %config.file.display(), "export read");

    let report =
        sightings_loader::run(&store, records, config.batch_size, chrono::Utc::now()).await;

    println!(
        "loaded {}/{} records ({} errors)",
        report.inserted,
        report.total,
        report.errors.len()
    );
    for error in report.errors.iter().take(REPORTED_ERRORS) {
        println!("  - {}", error);
    }
    if report.errors.len() > REPORTED_ERRORS {
        println!("  ... and {} more", report.errors.len() - REPORTED_ERRORS);
    }

    match sightings_loader::sample(&store).await {
        Ok(Some(summary)) => println!("sample: {}", summary),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "failed to read a sample record"),
    }

    store.shutdown().await;

    if report.inserted == 0 {
        anyhow::bail!("no valid records were inserted");
    }
    Ok(())
}
