//! Storage traits and error types
//!
//! This module defines the trait interface for the run index backend and
//! associated error types.

use crate::output::Stats;
use crate::state::FetchOutcome;
use crate::storage::{ArtifactRecord, PageListing, PageQuery, RunRecord, RunStatus};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage is failing persistently: {0}")]
    Systemic(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for run index backends
///
/// The index holds one row per run and one row per artifact record. Writes
/// come from the crawl while it runs; reads serve the viewer.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run in `running` state
    ///
    /// # Arguments
    ///
    /// * `run_id` - Unique run identifier
    /// * `start_url` - The crawl's start URL
    /// * `config_json` - Serialized crawl configuration snapshot
    /// * `config_hash` - SHA-256 of the configuration snapshot
    fn create_run(
        &mut self,
        run_id: &str,
        start_url: &str,
        config_json: &str,
        config_hash: &str,
    ) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: &str) -> StorageResult<RunRecord>;

    /// Lists all runs, newest first
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;

    /// Records the terminal state of a run
    fn finish_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        stats: &Stats,
        archive_path: Option<&str>,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    // ===== Record Index =====

    /// Appends a record to a run's index
    ///
    /// # Returns
    ///
    /// The record's sequence number
    fn append_record(&mut self, record: &ArtifactRecord) -> StorageResult<i64>;

    /// Gets every record of a run in append order
    fn get_records(&self, run_id: &str) -> StorageResult<Vec<ArtifactRecord>>;

    /// Paginated, searchable, filterable listing of a run's records
    fn list_records(&self, run_id: &str, query: &PageQuery) -> StorageResult<PageListing>;

    /// Case-insensitive substring search over URL and domain in every run
    fn search_records(&self, needle: &str, limit: u32) -> StorageResult<Vec<ArtifactRecord>>;

    /// Finds the first record of a run referencing a content hash
    fn find_record_by_hash(&self, run_id: &str, hash: &str)
        -> StorageResult<Option<ArtifactRecord>>;

    /// Finds the first record of a run for exactly this URL
    fn find_record_by_url(&self, run_id: &str, url: &str) -> StorageResult<Option<ArtifactRecord>>;

    // ===== Statistics =====

    /// Counts a run's records with a given outcome
    fn count_records_by_outcome(&self, run_id: &str, outcome: FetchOutcome) -> StorageResult<u64>;

    /// Successful records per domain
    fn get_domain_counts(&self, run_id: &str) -> StorageResult<BTreeMap<String, u64>>;

    /// Successful records per depth
    fn get_depth_breakdown(&self, run_id: &str) -> StorageResult<BTreeMap<u32, u64>>;

    /// Successful records per MIME type (parameters stripped)
    fn get_content_type_breakdown(&self, run_id: &str) -> StorageResult<BTreeMap<String, u64>>;
}
