//! Checkpoint management for shoplens-analytics
//!
//! A sync checkpoint remembers the wall-clock time of the last fully
//! successful synchronization for a *domain* (an independent unit of sync
//! work, such as the whole collection-sync run). The sync engine reads the
//! checkpoint once at the start of a run to decide between a full load and
//! an incremental sync, and writes it exactly once after every collection in
//! the run has succeeded.
//!
//! Absence of a checkpoint is meaningful: it signals "perform a full load",
//! not an error. A backend that cannot be reached must instead fail loudly,
//! because silently reporting "absent" would trigger an unwanted full
//! reload of the destination tables.
//!
//! # Storage Backends
//!
//! - [`FilesystemStore`] - stores one JSON file per domain
//! - [`MemoryStore`] - in-process map, intended for tests

mod filesystem;
mod memory;
mod store;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use store::{CheckpointStore, StoredCheckpoint};

/// Checkpoint domain covering the whole collection-sync run.
///
/// All source collections share one checkpoint on purpose: the checkpoint is
/// only advanced after every collection in the run has synced successfully,
/// so a partially failed run retries the same window for all of them.
pub const COLLECTION_SYNC_DOMAIN: &str = "collection-sync";
