//! Static job definition registry.
//!
//! All ETL work is declared here as immutable job descriptors, built at
//! process start from the engine configuration. Collection-sync jobs are
//! consumed by the sync engine on its own schedule; SQL transform jobs are
//! grouped into ordered stages consumed by the orchestrator. Ordering is
//! significant in both lists: later jobs may read tables earlier jobs
//! populate.

use chrono::NaiveDate;
use std::str::FromStr;

use crate::config::EngineConfig;
use crate::value::{QueryParam, RowValue};

/// Pipeline stage. Stages run strictly in the order [`Stage::all`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Foundation,
    Summary,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[Stage::Foundation, Stage::Summary]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Foundation => "foundation",
            Stage::Summary => "summary",
        }
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "foundation" => Ok(Stage::Foundation),
            "summary" => Ok(Stage::Summary),
            other => Err(anyhow::anyhow!(
                "Unknown pipeline stage '{other}' (expected 'foundation' or 'summary')"
            )),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a SQL transform writes into its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Body is wrapped as `INSERT INTO <destination> <body>`.
    Append,
    /// Body is already a complete MERGE statement.
    Merge,
}

/// Sync of one source collection into a warehouse table.
#[derive(Debug, Clone)]
pub struct CollectionSyncJob {
    pub name: &'static str,
    pub source_collection: &'static str,
    pub destination_table: String,
}

/// File-defined SQL transform executed as a single query job.
#[derive(Debug, Clone)]
pub struct SqlTransformJob {
    pub name: &'static str,
    pub stage: Stage,
    pub destination_table: String,
    pub template_file: &'static str,
    pub disposition: WriteDisposition,
    /// Date column used to scope the Append delete-then-insert; `None` for
    /// Merge jobs, which are idempotent on their own.
    pub date_column: Option<&'static str>,
    /// Runtime query parameters for the templated statement.
    pub parameter_fn: fn(NaiveDate) -> Vec<QueryParam>,
}

/// One registered job of either kind.
#[derive(Debug, Clone)]
pub enum JobDescriptor {
    CollectionSync(CollectionSyncJob),
    SqlTransform(SqlTransformJob),
}

/// Parameters shared by every current transform: the target date.
fn target_date_params(target_date: NaiveDate) -> Vec<QueryParam> {
    vec![QueryParam::new("target_date", RowValue::Date(target_date))]
}

/// The full static registry, in registration order.
pub fn registry(config: &EngineConfig) -> Vec<JobDescriptor> {
    let foundation = &config.foundation_dataset;
    let summary = &config.summary_dataset;

    vec![
        JobDescriptor::CollectionSync(CollectionSyncJob {
            name: "sync-users",
            source_collection: "users",
            destination_table: config.table_ref(foundation, "users"),
        }),
        JobDescriptor::CollectionSync(CollectionSyncJob {
            name: "sync-products",
            source_collection: "products",
            destination_table: config.table_ref(foundation, "products"),
        }),
        JobDescriptor::CollectionSync(CollectionSyncJob {
            name: "sync-scans",
            source_collection: "scans",
            destination_table: config.table_ref(foundation, "scans"),
        }),
        JobDescriptor::SqlTransform(SqlTransformJob {
            name: "daily-scan-events",
            stage: Stage::Foundation,
            destination_table: config.table_ref(foundation, "daily_scan_events"),
            template_file: "daily_scan_events.sql",
            disposition: WriteDisposition::Append,
            date_column: Some("event_date"),
            parameter_fn: target_date_params,
        }),
        JobDescriptor::SqlTransform(SqlTransformJob {
            name: "user-activity-summary",
            stage: Stage::Summary,
            destination_table: config.table_ref(summary, "user_activity_summary"),
            template_file: "user_activity_summary.sql",
            disposition: WriteDisposition::Merge,
            date_column: None,
            parameter_fn: target_date_params,
        }),
        JobDescriptor::SqlTransform(SqlTransformJob {
            name: "product-scan-summary",
            stage: Stage::Summary,
            destination_table: config.table_ref(summary, "product_scan_summary"),
            template_file: "product_scan_summary.sql",
            disposition: WriteDisposition::Merge,
            date_column: None,
            parameter_fn: target_date_params,
        }),
    ]
}

/// Collection-sync jobs in registration order.
pub fn collection_sync_jobs(config: &EngineConfig) -> Vec<CollectionSyncJob> {
    registry(config)
        .into_iter()
        .filter_map(|job| match job {
            JobDescriptor::CollectionSync(job) => Some(job),
            JobDescriptor::SqlTransform(_) => None,
        })
        .collect()
}

/// SQL transform jobs of one stage, in registration order.
pub fn stage_jobs(config: &EngineConfig, stage: Stage) -> Vec<SqlTransformJob> {
    registry(config)
        .into_iter()
        .filter_map(|job| match job {
            JobDescriptor::SqlTransform(job) if job.stage == stage => Some(job),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config() -> EngineConfig {
        EngineConfig::parse_from(["test"])
    }

    #[test]
    fn collection_jobs_preserve_registration_order() {
        let names: Vec<_> = collection_sync_jobs(&config())
            .iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec!["sync-users", "sync-products", "sync-scans"]);
    }

    #[test]
    fn summary_stage_jobs_are_ordered_merges() {
        let jobs = stage_jobs(&config(), Stage::Summary);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].name, "user-activity-summary");
        assert!(jobs
            .iter()
            .all(|j| j.disposition == WriteDisposition::Merge));
    }

    #[test]
    fn append_jobs_declare_a_date_column() {
        for job in stage_jobs(&config(), Stage::Foundation) {
            if job.disposition == WriteDisposition::Append {
                assert!(job.date_column.is_some(), "{} needs a date column", job.name);
            }
        }
    }

    #[test]
    fn unknown_stage_name_fails_fast() {
        assert!(Stage::from_str("staging").is_err());
    }
}
