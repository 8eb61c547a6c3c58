//! ETL pipeline orchestrator.
//!
//! Sequences SQL transform jobs within a stage and stages within the
//! pipeline. Before running a stage it polls upstream availability (a count
//! of raw events for the target date in the reference timezone); zero rows
//! is an expected steady state while upstream data lands, treated like a
//! transient failure for retry purposes.
//!
//! One bounded fixed-delay retry wraps each stage attempt: a non-final
//! failure sleeps the configured delay, re-checks availability, and re-runs
//! the stage's jobs from the first one. Re-execution is safe because Merge
//! jobs are idempotent and Append jobs delete their target date first.
//! Stages run strictly in configured order; a failed stage blocks the rest.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tracing::info;

use crate::config::EngineConfig;
use crate::jobs::{self, Stage};
use crate::retry::RetryPolicy;
use crate::sqljob::SqlJobRunner;
use crate::value::{QueryParam, RowValue};
use crate::warehouse::Warehouse;

pub struct Orchestrator<'a> {
    warehouse: &'a dyn Warehouse,
    config: &'a EngineConfig,
    retry: RetryPolicy,
}

/// Default target date: yesterday in the configured reference timezone.
/// Scheduled runs process the previous day's events; backfills override the
/// date explicitly.
pub fn default_target_date(config: &EngineConfig) -> Result<NaiveDate> {
    let tz = config.reference_timezone()?;
    let today = Utc::now().with_timezone(&tz).date_naive();
    today
        .pred_opt()
        .ok_or_else(|| anyhow::anyhow!("Cannot compute yesterday from {today}"))
}

impl<'a> Orchestrator<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, config: &'a EngineConfig) -> Self {
        let retry = RetryPolicy::new(
            config.max_attempts,
            Duration::from_secs(config.retry_delay_secs),
        );
        Self {
            warehouse,
            config,
            retry,
        }
    }

    /// Run one stage, or every stage in configured order.
    pub async fn run_pipeline(&self, stage: Option<Stage>, target_date: NaiveDate) -> Result<()> {
        let stages: &[Stage] = match stage {
            Some(ref s) => std::slice::from_ref(s),
            None => Stage::all(),
        };

        for stage in stages {
            self.run_stage(*stage, target_date).await?;
        }
        Ok(())
    }

    /// Run one stage with availability polling and bounded retry.
    pub async fn run_stage(&self, stage: Stage, target_date: NaiveDate) -> Result<()> {
        info!("Running pipeline stage '{stage}' for {target_date}");
        self.retry
            .run(&format!("Pipeline stage '{stage}'"), |attempt| {
                self.attempt_stage(stage, target_date, attempt)
            })
            .await?;
        info!("Pipeline stage '{stage}' completed");
        Ok(())
    }

    /// One attempt: availability check, then the stage's jobs in order.
    async fn attempt_stage(&self, stage: Stage, target_date: NaiveDate, attempt: u32) -> Result<()> {
        self.check_availability(target_date)
            .await
            .with_context(|| format!("Availability check for stage '{stage}' (attempt {attempt})"))?;

        let runner = SqlJobRunner::new(self.warehouse, self.config);
        for job in jobs::stage_jobs(self.config, stage) {
            runner
                .run_job(&job, target_date)
                .await
                .with_context(|| format!("Stage '{stage}' (attempt {attempt})"))?;
        }
        Ok(())
    }

    /// Count raw events for the target date; zero means upstream data has
    /// not landed yet.
    async fn check_availability(&self, target_date: NaiveDate) -> Result<()> {
        let sql = format!(
            "SELECT COUNT(*) AS event_count FROM {} \
             WHERE (occurred_at AT TIME ZONE '{}')::date = @target_date",
            self.config.raw_events_table(),
            self.config.timezone
        );
        let params = [QueryParam::new("target_date", RowValue::Date(target_date))];

        let rows = self
            .warehouse
            .run_query(&sql, &params)
            .await
            .context("Availability query failed")?;
        let count = rows
            .first()
            .and_then(|row| row.get("event_count"))
            .and_then(RowValue::as_i64)
            .ok_or_else(|| anyhow::anyhow!("Availability query returned no count"))?;

        if count == 0 {
            anyhow::bail!("Raw events for {target_date} are not yet available");
        }
        info!("Raw events available for {target_date}: {count} row(s)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_templates, MemoryWarehouse};
    use clap::Parser;

    fn config(sql_dir: &std::path::Path, max_attempts: u32) -> EngineConfig {
        let mut config = EngineConfig::parse_from(["test"]);
        config.sql_template_dir = sql_dir.to_path_buf();
        config.max_attempts = max_attempts;
        config
    }

    fn target_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn stage_waits_for_availability_then_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        write_templates(dir.path());
        let config = config(dir.path(), 10);
        let warehouse = MemoryWarehouse::new();

        // Not ready on attempts 1-3, available on attempt 4
        warehouse.script_event_count(0);
        warehouse.script_event_count(0);
        warehouse.script_event_count(0);
        warehouse.script_event_count(812);

        let orchestrator = Orchestrator::new(&warehouse, &config);
        orchestrator
            .run_stage(Stage::Foundation, target_date())
            .await
            .unwrap();

        // Four availability polls, one job execution
        assert_eq!(warehouse.query_count(), 4);
        let inserts = warehouse
            .statements()
            .iter()
            .filter(|s| s.starts_with("INSERT INTO foundation.daily_scan_events"))
            .count();
        assert_eq!(inserts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_availability_budget_fails_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        write_templates(dir.path());
        let config = config(dir.path(), 3);
        let warehouse = MemoryWarehouse::new();
        for _ in 0..3 {
            warehouse.script_event_count(0);
        }

        let orchestrator = Orchestrator::new(&warehouse, &config);
        let err = orchestrator
            .run_stage(Stage::Summary, target_date())
            .await
            .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("3 attempt(s)"));
        assert!(message.contains("not yet available"));
        // No stage job ever ran
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stage_blocks_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        write_templates(dir.path());
        let config = config(dir.path(), 1);
        let warehouse = MemoryWarehouse::new();
        warehouse.script_event_count(0); // foundation never becomes available

        let orchestrator = Orchestrator::new(&warehouse, &config);
        let err = orchestrator
            .run_pipeline(None, target_date())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("foundation"));

        // Summary stage never polled availability or ran a job
        assert_eq!(warehouse.query_count(), 1);
        assert!(warehouse.statements().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stage_retry_reruns_jobs_from_the_first() {
        let dir = tempfile::tempdir().unwrap();
        write_templates(dir.path());
        let config = config(dir.path(), 2);
        let warehouse = MemoryWarehouse::new();
        warehouse.script_event_count(5);
        warehouse.script_event_count(5);
        // First MERGE into user_activity_summary fails, second attempt works
        warehouse.fail_statements_containing_once("MERGE INTO summary.user_activity_summary");

        let orchestrator = Orchestrator::new(&warehouse, &config);
        orchestrator
            .run_stage(Stage::Summary, target_date())
            .await
            .unwrap();

        // user-activity-summary attempted twice, product-scan-summary once
        let activity_merges = warehouse
            .statements()
            .iter()
            .filter(|s| s.contains("summary.user_activity_summary"))
            .count();
        let product_merges = warehouse
            .statements()
            .iter()
            .filter(|s| s.contains("summary.product_scan_summary"))
            .count();
        assert_eq!(activity_merges, 2);
        assert_eq!(product_merges, 1);
    }
}
