use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobagg_extract::OpenAiExtractor;
use jobagg_storage::{JobStore, MemoryJobStore, PgJobStore};
use jobagg_sync::{build_fleet, ScrapeScheduler, SyncConfig};
use jobagg_web::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobagg")]
#[command(about = "Job portal scraper and posting API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scrape pass over every enabled portal.
    Scrape {
        /// Keep results in memory instead of writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    Migrate,
    /// Serve the JSON API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Scrape at randomized times inside the daily windows, forever.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn,chromiumoxide=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Scrape { dry_run: false }) {
        Commands::Scrape { dry_run } => {
            let store: Arc<dyn JobStore> = if dry_run {
                Arc::new(MemoryJobStore::new())
            } else {
                Arc::new(connect(&config).await?)
            };
            let extractor = Arc::new(OpenAiExtractor::from_env()?);
            let fleet = build_fleet(&config, store, extractor)?;
            let summary = fleet.scrape_all().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            let store = PgJobStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve { port } => {
            let store: Arc<dyn JobStore> = Arc::new(connect(&config).await?);
            let extractor = Arc::new(OpenAiExtractor::from_env()?);
            let fleet = Arc::new(build_fleet(&config, store.clone(), extractor)?);
            let port = port.unwrap_or_else(jobagg_web::port_from_env);
            jobagg_web::serve(AppState::new(store, fleet), port).await?;
        }
        Commands::Schedule => {
            let store: Arc<dyn JobStore> = Arc::new(connect(&config).await?);
            let extractor = Arc::new(OpenAiExtractor::from_env()?);
            let fleet = Arc::new(build_fleet(&config, store, extractor)?);
            ScrapeScheduler::new(fleet).run_forever().await;
        }
    }

    Ok(())
}

async fn connect(config: &SyncConfig) -> Result<PgJobStore> {
    let store = PgJobStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("running migrations")?;
    Ok(store)
}
