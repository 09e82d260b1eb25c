//! Storage module for persisting crawl output
//!
//! This module handles everything a run writes, including:
//! - The content-addressed artifact store (`objects/ab/cdef...`)
//! - SQLite run index initialization and schema management
//! - Run rows and the per-run page/asset record index
//! - The per-run write path used by fetch workers (`RunStore`)

mod content;
mod run_store;
mod schema;
mod sqlite;
mod traits;

pub use content::{ContentHash, ContentStore};
pub use run_store::{RecordMeta, RunStore, SYSTEMIC_FAILURE_THRESHOLD};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::output::Stats;
use crate::state::{FetchOutcome, ResourceKind, RunState};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default page size for record listings
pub const DEFAULT_PER_PAGE: u32 = 50;

/// Upper bound on a requested page size
pub const MAX_PER_PAGE: u32 = 500;

/// Initializes or opens a run index database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// One entry of a run's record index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Position in the index (assigned on append, 1-based per database)
    #[serde(default)]
    pub seq: i64,
    pub run_id: String,
    pub url: String,
    pub domain: String,
    pub depth: u32,
    /// Content address; `None` for failed and skipped records
    pub content_hash: Option<String>,
    /// Stored (optimized) size in bytes
    pub size: u64,
    /// Downloaded size in bytes
    #[serde(default)]
    pub original_size: u64,
    pub content_type: Option<String>,
    /// RFC 3339 timestamp of the request start
    pub fetched_at: String,
    pub kind: ResourceKind,
    pub outcome: FetchOutcome,
    #[serde(default)]
    pub title: Option<String>,
    /// Optimizer fallback reason, if the stored bytes are the originals
    #[serde(default)]
    pub soft_failure: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ArtifactRecord {
    /// Returns true if the record references a stored artifact
    pub fn has_artifact(&self) -> bool {
        self.outcome == FetchOutcome::Ok && self.content_hash.is_some()
    }

    /// Returns true if the stored artifact is an HTML document
    pub fn is_html(&self) -> bool {
        self.kind == ResourceKind::Page
            || self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("html"))
    }
}

/// Represents a crawl run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub start_url: String,
    pub config_json: String,
    pub config_hash: String,
    pub status: RunStatus,
    pub stats: Option<Stats>,
    pub archive_path: Option<String>,
    pub error_message: Option<String>,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => RunState::Running,
            RunStatus::Completed => RunState::Completed,
            RunStatus::Stopped => RunState::Stopped,
            RunStatus::Failed => RunState::Failed,
        }
    }
}

/// Filters and paging for a record listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
    /// Case-insensitive substring of URL or domain
    pub search: Option<String>,
    /// Exact domain
    pub domain: Option<String>,
    pub kind: Option<ResourceKind>,
    pub outcome: Option<FetchOutcome>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
            search: None,
            domain: None,
            kind: None,
            outcome: None,
        }
    }
}

impl PageQuery {
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn search(mut self, needle: impl Into<String>) -> Self {
        self.search = Some(needle.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn outcome(mut self, outcome: FetchOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Page number and size after clamping to valid ranges
    pub fn normalized(&self) -> (u32, u32) {
        (self.page.max(1), self.per_page.clamp(1, MAX_PER_PAGE))
    }
}

/// One page of a record listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageListing {
    pub records: Vec<ArtifactRecord>,
    pub page: u32,
    pub per_page: u32,
    /// Matching records across all pages
    pub total: u64,
    pub total_pages: u32,
}

impl PageListing {
    pub fn new(records: Vec<ArtifactRecord>, page: u32, per_page: u32, total: u64) -> Self {
        let total_pages = total.div_ceil(u64::from(per_page.max(1))) as u32;
        Self {
            records,
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Simplified MIME type for breakdowns: parameters dropped, `unknown` if absent
pub fn simple_mime(content_type: Option<&str>) -> String {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
