//! SQL transform job runner.
//!
//! Runs one file-defined transform as a single query job: resolve runtime
//! parameters, ensure the destination table, render the template, and
//! execute the statement the write disposition calls for.
//!
//! Append jobs are made retry-safe by scoping a delete to the target date
//! before the insert; re-running the job for the same date can therefore
//! never duplicate rows even when a prior stage attempt partially
//! succeeded. Merge jobs are idempotent by construction.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::config::EngineConfig;
use crate::jobs::{SqlTransformJob, WriteDisposition};
use crate::table;
use crate::template::TemplateContext;
use crate::warehouse::Warehouse;

pub struct SqlJobRunner<'a> {
    warehouse: &'a dyn Warehouse,
    config: &'a EngineConfig,
}

impl<'a> SqlJobRunner<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, config: &'a EngineConfig) -> Self {
        Self { warehouse, config }
    }

    /// Execute one SQL transform job for the given target date.
    pub async fn run_job(&self, job: &SqlTransformJob, target_date: NaiveDate) -> Result<()> {
        info!(
            "Running SQL job '{}' for {target_date} into {}",
            job.name, job.destination_table
        );

        let params = (job.parameter_fn)(target_date);

        table::ensure_table(self.warehouse, &job.destination_table, &self.config.location)
            .await
            .with_context(|| format!("SQL job '{}' failed", job.name))?;

        let template = self
            .config
            .load_template(job.template_file)
            .with_context(|| format!("SQL job '{}' failed", job.name))?;

        let body = TemplateContext::new()
            .bind("raw_dataset", &self.config.raw_dataset)
            .bind("foundation_dataset", &self.config.foundation_dataset)
            .bind("summary_dataset", &self.config.summary_dataset)
            .bind("destination", &job.destination_table)
            .bind("timezone", &self.config.timezone)
            .render(&template)
            .with_context(|| format!("SQL job '{}' failed", job.name))?;

        let statement = match job.disposition {
            WriteDisposition::Append => {
                if let Some(date_column) = job.date_column {
                    // Delete-then-insert keeps Append jobs idempotent per
                    // target date across stage retries.
                    self.warehouse
                        .run_statement(
                            &format!(
                                "DELETE FROM {} WHERE {date_column} = @target_date",
                                job.destination_table
                            ),
                            &params,
                        )
                        .await
                        .with_context(|| {
                            format!("SQL job '{}' failed clearing target date", job.name)
                        })?;
                }
                format!("INSERT INTO {}\n{body}", job.destination_table)
            }
            // The template body is already a complete MERGE statement
            WriteDisposition::Merge => body,
        };

        let affected = self
            .warehouse
            .run_statement(&statement, &params)
            .await
            .with_context(|| format!("SQL job '{}' failed", job.name))?;

        info!("SQL job '{}' completed ({affected} rows affected)", job.name);
        Ok(())
    }
}
