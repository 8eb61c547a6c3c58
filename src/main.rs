use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::info;

use shoplens_analytics::config::EngineConfig;
use shoplens_analytics::jobs::Stage;
use shoplens_analytics::orchestrator::{self, Orchestrator};
use shoplens_analytics::source::MongoSource;
use shoplens_analytics::sync::SyncEngine;
use shoplens_analytics::warehouse::PostgresWarehouse;
use shoplens_analytics::{CheckpointOpts, SourceOpts, WarehouseOpts};

#[derive(Parser)]
#[command(name = "shoplens-analytics")]
#[command(about = "Analytics sync and transform engine for ShopLens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync operational collections into the warehouse
    Sync {
        #[command(flatten)]
        source: SourceOpts,

        #[command(flatten)]
        warehouse: WarehouseOpts,

        #[command(flatten)]
        checkpoint: CheckpointOpts,

        #[command(flatten)]
        engine: EngineConfig,
    },
    /// Run the staged SQL transform pipeline
    Pipeline {
        #[command(flatten)]
        warehouse: WarehouseOpts,

        #[command(flatten)]
        engine: EngineConfig,

        /// Run a single stage instead of the whole pipeline
        #[arg(long)]
        stage: Option<String>,

        /// Target date (YYYY-MM-DD); defaults to yesterday in the
        /// configured reference timezone
        #[arg(long)]
        target_date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            source,
            warehouse,
            checkpoint,
            engine,
        } => {
            let source = MongoSource::connect(&source.source_uri, &source.source_database)
                .await
                .context("Failed to connect to the operational source")?;
            let warehouse = PostgresWarehouse::connect(&warehouse.warehouse_uri)
                .await
                .context("Failed to connect to the warehouse")?;
            let checkpoints = checkpoint::FilesystemStore::new(&checkpoint.checkpoint_dir);

            SyncEngine::new(&source, &warehouse, &checkpoints, &engine)
                .sync_all()
                .await?;
        }
        Commands::Pipeline {
            warehouse,
            engine,
            stage,
            target_date,
        } => {
            let warehouse = PostgresWarehouse::connect(&warehouse.warehouse_uri)
                .await
                .context("Failed to connect to the warehouse")?;

            let stage = stage.as_deref().map(Stage::from_str).transpose()?;
            let target_date = match target_date {
                Some(s) => NaiveDate::from_str(&s)
                    .with_context(|| format!("Invalid target date '{s}' (expected YYYY-MM-DD)"))?,
                None => orchestrator::default_target_date(&engine)?,
            };
            info!("Pipeline target date: {target_date}");

            Orchestrator::new(&warehouse, &engine)
                .run_pipeline(stage, target_date)
                .await?;
        }
    }

    Ok(())
}
