//! Viewer read paths
//!
//! The catalog answers the questions a run viewer asks: which runs exist,
//! what a run fetched, and what a stored artifact looks like. Listings come
//! from the run index; artifacts come from the run's content store while it
//! is still on disk and from the run's archive otherwise.

use crate::archive::{insert_base_tag, ArchiveReader, RunMetadata};
use crate::config::OutputConfig;
use crate::output::{load_breakdown, RunBreakdown};
use crate::storage::{
    open_storage, ArtifactRecord, ContentHash, ContentStore, PageListing, PageQuery, RunRecord,
    SqliteStorage, Storage, StorageError,
};
use crate::Result;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Results returned by [`Catalog::search`] when no limit is given
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;

pub struct Catalog {
    output: OutputConfig,
    index: Arc<Mutex<SqliteStorage>>,
}

impl Catalog {
    /// Opens the run index under the data directory
    pub fn open(output: OutputConfig) -> Result<Self> {
        let index = open_storage(&output.database_path())?;
        Ok(Self::with_index(output, Arc::new(Mutex::new(index))))
    }

    /// Reads from an index shared with a controller
    pub fn with_index(output: OutputConfig, index: Arc<Mutex<SqliteStorage>>) -> Self {
        Self { output, index }
    }

    /// All runs, newest first
    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self.lock().list_runs()?)
    }

    pub fn run(&self, run_id: &str) -> Result<RunRecord> {
        Ok(self.lock().get_run(run_id)?)
    }

    /// The metadata document packed into a run's archive
    pub fn metadata(&self, run_id: &str) -> Result<RunMetadata> {
        Ok(self.archive(run_id)?.metadata().clone())
    }

    /// One page of a run's records, optionally searched and filtered
    pub fn pages(&self, run_id: &str, query: &PageQuery) -> Result<PageListing> {
        let storage = self.lock();
        storage.get_run(run_id)?;
        Ok(storage.list_records(run_id, query)?)
    }

    /// Substring search over URL and domain across every run
    pub fn search(&self, needle: &str, limit: Option<u32>) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .lock()
            .search_records(needle, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))?)
    }

    /// Content-type, depth and domain distributions of a run
    pub fn breakdown(&self, run_id: &str) -> Result<RunBreakdown> {
        let storage = self.lock();
        storage.get_run(run_id)?;
        Ok(load_breakdown(&*storage, run_id)?)
    }

    /// Opens a run's archive
    ///
    /// Uses the path recorded on the run row, falling back to
    /// `<archive_dir>/<run_id>.tar.zst`.
    pub fn archive(&self, run_id: &str) -> Result<ArchiveReader> {
        Ok(ArchiveReader::open(self.archive_path(run_id)?)?)
    }

    /// Artifact bytes and recorded content type
    ///
    /// # Arguments
    ///
    /// * `run_id` - Run the artifact belongs to
    /// * `hash` - Hex SHA-256 content address
    ///
    /// # Returns
    ///
    /// * `Ok((bytes, content_type))` - The stored artifact
    /// * `Err(ScrollError)` - Malformed hash, or no such artifact in the run
    pub fn artifact(&self, run_id: &str, hash: &str) -> Result<(Vec<u8>, Option<String>)> {
        let hash = ContentHash::parse(hash)
            .ok_or_else(|| StorageError::ArtifactNotFound(hash.to_string()))?;

        let record = self.lock().find_record_by_hash(run_id, hash.as_str())?;
        if let Some(record) = record {
            let live = ContentStore::open(self.output.run_dir(run_id))?;
            if live.contains(&hash) {
                return Ok((live.get(&hash)?, record.content_type));
            }
        }

        Ok(self.archive(run_id)?.artifact_with_type(&hash)?)
    }

    /// A stored HTML page with a `<base>` tag pointing at its original URL
    pub fn preview(&self, run_id: &str, url: &str) -> Result<String> {
        let record = {
            let storage = self.lock();
            storage.get_run(run_id)?;
            storage.find_record_by_url(run_id, url)?
        };

        let live = record.filter(|r| r.has_artifact() && r.is_html()).and_then(|r| {
            let hash = ContentHash::parse(r.content_hash.as_deref()?)?;
            let path = self.output.run_dir(run_id).join(hash.relative_path());
            let bytes = std::fs::read(path).ok()?;
            Some(insert_base_tag(&String::from_utf8_lossy(&bytes), &r.url))
        });

        match live {
            Some(html) => Ok(html),
            None => Ok(self.archive(run_id)?.preview(url, None)?),
        }
    }

    fn archive_path(&self, run_id: &str) -> Result<PathBuf> {
        let run = self.lock().get_run(run_id)?;
        Ok(run
            .archive_path
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output.archive_path(run_id)))
    }

    fn lock(&self) -> MutexGuard<'_, SqliteStorage> {
        match self.index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
