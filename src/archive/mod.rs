//! Run archives
//!
//! A finished run is packaged as one `<run_id>.tar.zst` file holding:
//! - `metadata.json`: the run, its config snapshot, stats and full record index
//! - `summary.md`: a human-readable summary
//! - `objects/<hh>/<rest-of-hash>`: every stored artifact, once per hash
//!
//! The archive is self-contained: [`ArchiveReader`] serves listings, artifacts
//! and previews from it without the crawler's working directory.

mod builder;
mod reader;

pub use builder::{build_archive, ArchiveReport};
pub use reader::{ArchiveEntry, ArchiveReader};
pub(crate) use reader::insert_base_tag;

use crate::config::CrawlConfig;
use crate::output::Stats;
use crate::storage::{ArtifactRecord, RunRecord, RunStatus, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the metadata document inside an archive
pub const METADATA_ENTRY: &str = "metadata.json";

/// Name of the markdown summary inside an archive
pub const SUMMARY_ENTRY: &str = "summary.md";

/// Version of the metadata document layout
pub const FORMAT_VERSION: u32 = 1;

/// Errors raised while writing or reading archives
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive has no metadata.json")]
    MissingMetadata,

    #[error("Object {entry} hashes to {actual}")]
    HashMismatch { entry: String, actual: String },

    #[error("Artifact not found: {0}")]
    MissingArtifact(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for archive operations
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// The metadata document stored in every archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub format_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub start_url: String,
    pub status: RunStatus,
    pub config: CrawlConfig,
    pub config_hash: String,
    pub stats: Stats,
    #[serde(default)]
    pub error: Option<String>,
    /// Every record of the run, in append order
    pub records: Vec<ArtifactRecord>,
}

impl RunMetadata {
    /// Returns the record for a URL, if the run has one
    pub fn record_for_url(&self, url: &str) -> Option<&ArtifactRecord> {
        self.records.iter().find(|r| r.url == url)
    }

    /// Returns the first stored record referencing a content hash
    pub fn record_for_hash(&self, hash: &str) -> Option<&ArtifactRecord> {
        self.records
            .iter()
            .find(|r| r.has_artifact() && r.content_hash.as_deref() == Some(hash))
    }

    /// Distinct content hashes referenced by `ok` records, sorted
    pub fn artifact_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.has_artifact())
            .filter_map(|r| r.content_hash.clone())
            .collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    /// The run row this metadata describes
    pub fn to_run_record(&self, archive_path: Option<&str>) -> RunRecord {
        RunRecord {
            id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            start_url: self.start_url.clone(),
            config_json: serde_json::to_string(&self.config).unwrap_or_default(),
            config_hash: self.config_hash.clone(),
            status: self.status,
            stats: Some(self.stats.clone()),
            archive_path: archive_path.map(str::to_string),
            error_message: self.error.clone(),
        }
    }
}
