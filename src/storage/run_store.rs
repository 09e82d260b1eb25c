//! Per-run write path shared by the fetch workers
//!
//! `RunStore` ties together the object store, the record index and the
//! run's statistics so that every terminal outcome produces exactly one
//! record and exactly one stats update.

use crate::output::StatsTracker;
use crate::state::{FetchOutcome, ResourceKind};
use crate::storage::{ArtifactRecord, ContentHash, ContentStore, SqliteStorage, Storage, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Consecutive artifact write failures after which storage counts as broken
pub const SYSTEMIC_FAILURE_THRESHOLD: u32 = 5;

/// What is known about a resource when its outcome is recorded
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMeta {
    pub url: String,
    pub domain: String,
    pub depth: u32,
    pub kind: ResourceKind,
    pub content_type: Option<String>,
    /// Start of the request (the throttle slot)
    pub fetched_at: DateTime<Utc>,
    /// Downloaded bytes, before optimization
    pub original_size: u64,
    pub title: Option<String>,
    pub soft_failure: Option<String>,
}

impl RecordMeta {
    pub fn new(url: impl Into<String>, domain: impl Into<String>, depth: u32, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            depth,
            kind,
            content_type: None,
            fetched_at: Utc::now(),
            original_size: 0,
            title: None,
            soft_failure: None,
        }
    }

    fn into_record(
        self,
        run_id: &str,
        outcome: FetchOutcome,
        content_hash: Option<&ContentHash>,
        size: u64,
        error_message: Option<String>,
    ) -> ArtifactRecord {
        ArtifactRecord {
            seq: 0,
            run_id: run_id.to_string(),
            url: self.url,
            domain: self.domain,
            depth: self.depth,
            content_hash: content_hash.map(|h| h.to_string()),
            size,
            original_size: self.original_size,
            content_type: self.content_type,
            fetched_at: self.fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            kind: self.kind,
            outcome,
            title: self.title,
            soft_failure: self.soft_failure,
            error_message,
        }
    }
}

pub struct RunStore {
    run_id: String,
    content: ContentStore,
    index: Arc<Mutex<SqliteStorage>>,
    stats: Arc<StatsTracker>,
    consecutive_failures: AtomicU32,
    systemic: Mutex<Option<String>>,
}

impl RunStore {
    pub fn new(
        run_id: impl Into<String>,
        content: ContentStore,
        index: Arc<Mutex<SqliteStorage>>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            content,
            index,
            stats,
            consecutive_failures: AtomicU32::new(0),
            systemic: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    /// Stores an optimized artifact and appends its `ok` record
    ///
    /// A failed object write is recorded as a `failed` record before the
    /// error is returned. A failed index write marks storage as systemically
    /// broken, since the record index can no longer be trusted.
    pub fn put(&self, bytes: &[u8], meta: RecordMeta) -> StorageResult<ContentHash> {
        let hash = match self.content.put(bytes) {
            Ok((hash, _)) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                hash
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!("Failed to store artifact for {}: {}", meta.url, e);
                if failures >= SYSTEMIC_FAILURE_THRESHOLD {
                    self.mark_systemic(format!(
                        "{} consecutive artifact writes failed, last: {}",
                        failures, e
                    ));
                }
                self.record_failure(meta, &format!("Store error: {}", e))?;
                return Err(e);
            }
        };

        let record = meta.into_record(&self.run_id, FetchOutcome::Ok, Some(&hash), bytes.len() as u64, None);
        self.append(record)?;
        Ok(hash)
    }

    /// Appends a `failed` record
    pub fn record_failure(&self, meta: RecordMeta, error: &str) -> StorageResult<()> {
        let record = meta.into_record(&self.run_id, FetchOutcome::Failed, None, 0, Some(error.to_string()));
        self.append(record)
    }

    /// Appends a `skipped` record
    pub fn record_skipped(&self, meta: RecordMeta, reason: &str) -> StorageResult<()> {
        let record = meta.into_record(&self.run_id, FetchOutcome::Skipped, None, 0, Some(reason.to_string()));
        self.append(record)
    }

    /// Reason storage is unusable, if it is
    pub fn systemic_error(&self) -> Option<String> {
        lock(&self.systemic).clone()
    }

    fn append(&self, record: ArtifactRecord) -> StorageResult<()> {
        let appended = lock(&self.index).append_record(&record);
        match appended {
            Ok(_) => {
                self.stats.record(&record);
                Ok(())
            }
            Err(e) => {
                self.mark_systemic(format!("Record index write failed: {}", e));
                Err(e)
            }
        }
    }

    fn mark_systemic(&self, reason: String) {
        let mut systemic = lock(&self.systemic);
        if systemic.is_none() {
            tracing::error!("Storage failure for run {}: {}", self.run_id, reason);
            *systemic = Some(reason);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (RunStore, Arc<Mutex<SqliteStorage>>) {
        let mut index = SqliteStorage::new_in_memory().unwrap();
        index.create_run("r1", "https://a.com/", "{}", "h").unwrap();
        let index = Arc::new(Mutex::new(index));
        let content = ContentStore::open(dir.path().join("r1")).unwrap();
        let store = RunStore::new("r1", content, Arc::clone(&index), Arc::new(StatsTracker::new()));
        (store, index)
    }

    fn meta(url: &str, kind: ResourceKind) -> RecordMeta {
        let mut meta = RecordMeta::new(url, "a.com", 0, kind);
        meta.original_size = 100;
        meta
    }

    #[test]
    fn test_identical_bytes_share_one_object() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        let a = store.put(b"pixel", meta("https://a.com/a.png", ResourceKind::Image)).unwrap();
        let b = store.put(b"pixel", meta("https://a.com/b.png", ResourceKind::Image)).unwrap();
        assert_eq!(a, b);

        let records = index.lock().unwrap().get_records("r1").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.content_hash.as_deref() == Some(a.as_str())));

        let stats = store.stats().snapshot();
        assert_eq!(stats.pages_scraped, 2);
        assert_eq!(stats.assets_stored, 2);
        assert_eq!(stats.bytes_downloaded, 200);
    }

    #[test]
    fn test_failed_and_skipped_records() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        store
            .record_failure(meta("https://a.com/gone", ResourceKind::Page), "HTTP 404")
            .unwrap();
        store
            .record_skipped(meta("https://a.com/private", ResourceKind::Page), "Disallowed by robots.txt")
            .unwrap();

        let records = index.lock().unwrap().get_records("r1").unwrap();
        assert_eq!(records[0].outcome, FetchOutcome::Failed);
        assert_eq!(records[0].error_message.as_deref(), Some("HTTP 404"));
        assert!(records[0].content_hash.is_none());
        assert_eq!(records[1].outcome, FetchOutcome::Skipped);

        let stats = store.stats().snapshot();
        assert_eq!(stats.pages_failed, 1);
        assert_eq!(stats.pages_skipped, 1);
        assert_eq!(stats.pages_scraped, 0);
        assert!(store.systemic_error().is_none());
    }

    #[test]
    fn test_index_failure_is_systemic() {
        let dir = TempDir::new().unwrap();
        let (store, _index) = setup(&dir);

        store.put(b"x", meta("https://a.com/", ResourceKind::Page)).unwrap();
        // Same URL violates the per-run uniqueness constraint
        assert!(store.put(b"y", meta("https://a.com/", ResourceKind::Page)).is_err());
        assert!(store.systemic_error().is_some());
    }

    #[test]
    fn test_repeated_object_write_failures_are_systemic() {
        let dir = TempDir::new().unwrap();
        let (store, index) = setup(&dir);

        // Replace the objects directory with a file so every write fails
        let objects = store.content().root().join("objects");
        std::fs::remove_dir_all(&objects).unwrap();
        std::fs::write(&objects, b"not a directory").unwrap();

        for i in 0..SYSTEMIC_FAILURE_THRESHOLD {
            let url = format!("https://a.com/{}", i);
            assert!(store.put(format!("body {}", i).as_bytes(), meta(&url, ResourceKind::Page)).is_err());
        }

        assert!(store.systemic_error().is_some());
        let failed = index
            .lock()
            .unwrap()
            .count_records_by_outcome("r1", FetchOutcome::Failed)
            .unwrap();
        assert_eq!(failed, u64::from(SYSTEMIC_FAILURE_THRESHOLD));
    }
}
