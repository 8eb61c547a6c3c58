//! Environment-driven engine configuration.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Warehouse dataset layout and pipeline tuning knobs.
///
/// All values come from the environment in deployments; the CLI flags exist
/// for local runs and backfills.
#[derive(Parser, Clone, Debug)]
pub struct EngineConfig {
    /// Analytics project identifier (for log correlation across services)
    #[arg(long, env = "ANALYTICS_PROJECT", default_value = "shoplens")]
    pub project: String,

    /// Dataset receiving raw client events
    #[arg(long, env = "RAW_DATASET", default_value = "raw")]
    pub raw_dataset: String,

    /// Dataset for synced collections and foundation transforms
    #[arg(long, env = "FOUNDATION_DATASET", default_value = "foundation")]
    pub foundation_dataset: String,

    /// Dataset for summary transforms
    #[arg(long, env = "SUMMARY_DATASET", default_value = "summary")]
    pub summary_dataset: String,

    /// Warehouse location/region tag attached to every table operation
    #[arg(long, env = "WAREHOUSE_LOCATION", default_value = "asia-northeast1")]
    pub location: String,

    /// Reference timezone for target-date defaults and availability checks
    #[arg(long, env = "PIPELINE_TIMEZONE", default_value = "Asia/Tokyo")]
    pub timezone: String,

    /// Directory holding the SQL transform templates
    #[arg(long, env = "SQL_TEMPLATE_DIR", default_value = "sql")]
    pub sql_template_dir: PathBuf,

    /// Page size for source collection pagination
    #[arg(long, default_value = "1000")]
    pub page_size: usize,

    /// Maximum attempts for availability waits and stage execution
    #[arg(long, env = "PIPELINE_MAX_ATTEMPTS", default_value = "10")]
    pub max_attempts: u32,

    /// Delay between pipeline retry attempts, in seconds
    #[arg(long, env = "PIPELINE_RETRY_DELAY_SECS", default_value = "3600")]
    pub retry_delay_secs: u64,
}

impl EngineConfig {
    /// Parse the configured reference timezone.
    pub fn reference_timezone(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid PIPELINE_TIMEZONE '{}': {e}", self.timezone))
    }

    /// Fully-qualified reference to a table in a dataset.
    pub fn table_ref(&self, dataset: &str, table: &str) -> String {
        format!("{dataset}.{table}")
    }

    /// Raw client event table polled by the availability check.
    pub fn raw_events_table(&self) -> String {
        self.table_ref(&self.raw_dataset, "events")
    }

    /// Load a SQL template by file name from the template directory.
    pub fn load_template(&self, file_name: &str) -> Result<String> {
        let path = self.sql_template_dir.join(file_name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQL template {}", path.display()))
    }
}
