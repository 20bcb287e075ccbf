use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use statweb_cli::{Command, Config};
use statweb_client::{CkanCatalog, StatwebClient};
use statweb_core::{
    CatalogClient, HarvestConfig, HarvestJob, HarvestService, HarvestStats, HarvesterInfo,
    HttpConfig, SourceEntry, TracingReporter, load_sources_config,
};
use statweb_db::ObjectRepository;

const MAX_DB_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::parse();

    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    match config.command {
        Command::Harvest {
            database_url,
            ckan_url,
            ckan_api_key,
            site_url,
            config: config_path,
            source,
            scratch_dir,
        } => {
            let sources = select_sources(config_path, &source)?;
            if sources.is_empty() {
                info!("No enabled sources found in configuration.");
                info!("Enable a source in ~/.config/statweb/harvest.toml or use --source <NAME>");
                return Ok(());
            }

            info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(MAX_DB_CONNECTIONS)
                .connect(&database_url)
                .await
                .context("Failed to connect to database")?;
            let ledger = ObjectRepository::new(pool);
            ledger
                .migrate()
                .await
                .context("Failed to prepare the harvest ledger")?;

            let mut harvest_config =
                HarvestConfig::default().with_site_url(site_url.unwrap_or_else(|| ckan_url.clone()));
            if let Some(dir) = scratch_dir {
                harvest_config = harvest_config.with_scratch_dir(dir);
            }

            let http_config = HttpConfig::default();
            let source_client = StatwebClient::with_config(&http_config, harvest_config.chunk_size)
                .context("Failed to build the statistics site client")?;
            let catalog = CkanCatalog::with_config(&ckan_url, ckan_api_key, &http_config)
                .and_then(|c| c.with_site_url(&harvest_config.site_url))
                .context("Invalid catalog URL")?;

            let identity = catalog
                .service_identity()
                .await
                .context("Failed to resolve the catalog service user")?;
            if identity.can_write() {
                info!("Publishing as {}", identity.name);
            } else {
                warn!(
                    "No API key for {}, the catalog will reject every import",
                    identity.name
                );
            }

            let service =
                HarvestService::with_config(ledger, source_client, catalog, harvest_config);

            let job = HarvestJob::new(sources);
            info!("════════════════════════════════════════════════════════════");
            info!("Starting harvest job {} over {} sources", job.id, job.sources.len());
            info!("════════════════════════════════════════════════════════════");

            let stats = service
                .run_job_with_progress(&job, &TracingReporter)
                .await
                .context("Harvest job aborted")?;
            print_job_summary(&job, &stats);
        }
        Command::Info => {
            print_info(&HarvesterInfo::statweb());
        }
    }

    Ok(())
}

/// Resolves the sources of a run: the named ones when given, otherwise
/// every enabled source of the configuration file.
fn select_sources(
    config_path: Option<PathBuf>,
    names: &[String],
) -> anyhow::Result<Vec<SourceEntry>> {
    let sources_config = load_sources_config(config_path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "No configuration file found. Create ~/.config/statweb/harvest.toml or use --config"
        )
    })?;

    if names.is_empty() {
        return Ok(sources_config
            .enabled_sources()
            .into_iter()
            .cloned()
            .collect());
    }

    names
        .iter()
        .map(|name| -> anyhow::Result<SourceEntry> {
            let entry = sources_config
                .find_by_name(name)
                .ok_or_else(|| anyhow::anyhow!("Source '{}' not found in configuration", name))?;
            if !entry.enabled {
                info!("Note: source '{}' is marked as disabled in configuration", name);
            }
            Ok(entry.clone())
        })
        .collect()
}

/// Print a summary of one harvest job.
fn print_job_summary(job: &HarvestJob, stats: &HarvestStats) {
    info!("");
    info!("════════════════════════════════════════════════════════════");
    info!("Harvest job complete: {}", job.id);
    info!("════════════════════════════════════════════════════════════");
    info!("  + Gathered:          {}", stats.gathered);
    info!("  ↓ Fetched:           {}", stats.fetched);
    info!("  ✓ Imported:          {}", stats.imported);
    info!("────────────────────────────────────────────────────────────");
    info!("  ✗ Sources failed:    {}", stats.sources_failed);
    info!("  ✗ Fetch failed:      {}", stats.fetch_failed);
    info!("  ✗ Import failed:     {}", stats.import_failed);
    info!("════════════════════════════════════════════════════════════");

    if stats.is_complete() {
        info!("All indicators harvested successfully!");
    } else {
        warn!(
            "{} objects and {} sources failed, see the ledger for per-object errors",
            stats.failed(),
            stats.sources_failed
        );
    }
}

fn print_info(info: &HarvesterInfo) {
    println!("name:        {}", info.name);
    println!("title:       {}", info.title);
    println!("description: {}", info.description);
}
