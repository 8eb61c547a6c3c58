//! Analytics synchronization and transformation engine for the ShopLens
//! shopping assistant.
//!
//! Two entry surfaces share this library:
//!
//! - the collection sync engine ([`sync`]), which replicates operational
//!   MongoDB collections into warehouse foundation tables with
//!   checkpoint-driven incremental loads, and
//! - the ETL orchestrator ([`orchestrator`]), which runs the staged SQL
//!   transforms (foundation, then summary) against the warehouse once raw
//!   client events for the target date have landed.
//!
//! External systems are reached through trait seams ([`warehouse::Warehouse`],
//! [`source::OperationalSource`], `checkpoint::CheckpointStore`) so the
//! engines can be exercised end to end against in-process implementations.

pub mod config;
pub mod jobs;
pub mod orchestrator;
pub mod retry;
pub mod schema;
pub mod source;
pub mod sqljob;
pub mod sync;
pub mod table;
pub mod template;
pub mod testing;
pub mod transform;
pub mod upsert;
pub mod value;
pub mod warehouse;

use clap::Args;

/// Warehouse connection options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct WarehouseOpts {
    /// Warehouse connection string, e.g. "host=localhost user=analytics dbname=warehouse"
    #[arg(long, env = "WAREHOUSE_URI")]
    pub warehouse_uri: String,
}

/// Operational source connection options.
#[derive(Args, Debug, Clone)]
pub struct SourceOpts {
    /// MongoDB connection string, e.g. "mongodb://localhost:27017"
    #[arg(long, env = "MONGO_URI")]
    pub source_uri: String,

    /// Operational database holding the synced collections
    #[arg(long, env = "MONGO_DATABASE", default_value = "shoplens")]
    pub source_database: String,
}

/// Checkpoint store options.
#[derive(Args, Debug, Clone)]
pub struct CheckpointOpts {
    /// Directory for durable sync checkpoints
    #[arg(long, env = "CHECKPOINT_DIR", default_value = ".shoplens-checkpoints")]
    pub checkpoint_dir: std::path::PathBuf,
}
