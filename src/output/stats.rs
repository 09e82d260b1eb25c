//! Run statistics
//!
//! `StatsTracker` accumulates counters while workers record outcomes, and
//! `load_breakdown` derives the per-run distributions from the record index.

use crate::state::{FetchOutcome, ResourceKind};
use crate::storage::{ArtifactRecord, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Number of domains listed in a breakdown's top domains
pub const TOP_DOMAINS: usize = 10;

/// Crawl statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Resources stored with outcome `ok` (pages and assets)
    pub pages_scraped: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    /// Subset of `pages_scraped` that are not HTML pages
    pub assets_stored: u64,
    /// Bytes received from the network
    pub bytes_downloaded: u64,
    /// Bytes of the stored (optimized) artifacts
    pub bytes_stored: u64,
    pub elapsed_seconds: f64,
    pub pages_per_second: f64,
    /// `ok` records per domain
    pub domain_counts: BTreeMap<String, u64>,
    pub total_domains: u64,
    /// Filled in once the archive has been written
    #[serde(default)]
    pub compression: Option<CompressionReport>,
}

impl Stats {
    /// Total terminal outcomes recorded
    pub fn records(&self) -> u64 {
        self.pages_scraped + self.pages_failed + self.pages_skipped
    }
}

/// Size of the archive compared to the artifacts it packs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionReport {
    /// Uncompressed size of the archive contents
    pub original_size: u64,
    /// Size of the `.tar.zst` file
    pub compressed_size: u64,
    /// `compressed_size / original_size`; 0 for an empty archive
    pub ratio: f64,
}

impl CompressionReport {
    pub fn new(original_size: u64, compressed_size: u64) -> Self {
        let ratio = if original_size > 0 {
            compressed_size as f64 / original_size as f64
        } else {
            0.0
        };
        Self {
            original_size,
            compressed_size,
            ratio,
        }
    }

    /// Space saved, in percent
    pub fn savings_percent(&self) -> f64 {
        if self.original_size == 0 {
            0.0
        } else {
            (1.0 - self.ratio) * 100.0
        }
    }
}

/// Live statistics shared by the workers of a run
#[derive(Debug)]
pub struct StatsTracker {
    started: Instant,
    stats: Mutex<Stats>,
    frozen: Mutex<Option<Stats>>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stats: Mutex::new(Stats::default()),
            frozen: Mutex::new(None),
        }
    }

    /// Counts one terminal outcome
    ///
    /// Called once per appended record. Ignored after [`freeze`](Self::freeze).
    pub fn record(&self, record: &ArtifactRecord) {
        if lock(&self.frozen).is_some() {
            return;
        }

        let mut stats = lock(&self.stats);
        stats.bytes_downloaded += record.original_size;
        match record.outcome {
            FetchOutcome::Ok => {
                stats.pages_scraped += 1;
                stats.bytes_stored += record.size;
                if record.kind != ResourceKind::Page {
                    stats.assets_stored += 1;
                }
                *stats.domain_counts.entry(record.domain.clone()).or_insert(0) += 1;
                stats.total_domains = stats.domain_counts.len() as u64;
            }
            FetchOutcome::Failed => stats.pages_failed += 1,
            FetchOutcome::Skipped => stats.pages_skipped += 1,
        }
    }

    /// Current statistics with elapsed time filled in
    ///
    /// After [`freeze`](Self::freeze) this always returns the frozen copy.
    pub fn snapshot(&self) -> Stats {
        if let Some(frozen) = lock(&self.frozen).as_ref() {
            return frozen.clone();
        }
        let mut stats = lock(&self.stats).clone();
        fill_rates(&mut stats, self.started.elapsed().as_secs_f64());
        stats
    }

    /// Stops counting and fixes elapsed time and throughput
    ///
    /// Later calls return the statistics from the first call.
    pub fn freeze(&self) -> Stats {
        let mut frozen = lock(&self.frozen);
        if let Some(stats) = frozen.as_ref() {
            return stats.clone();
        }
        let mut stats = lock(&self.stats).clone();
        fill_rates(&mut stats, self.started.elapsed().as_secs_f64());
        *frozen = Some(stats.clone());
        stats
    }

    pub fn is_frozen(&self) -> bool {
        lock(&self.frozen).is_some()
    }
}

fn fill_rates(stats: &mut Stats, elapsed: f64) {
    stats.elapsed_seconds = (elapsed * 100.0).round() / 100.0;
    stats.pages_per_second = if elapsed > 0.0 {
        ((stats.pages_scraped as f64 / elapsed) * 100.0).round() / 100.0
    } else {
        0.0
    };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Distributions over a run's stored records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunBreakdown {
    /// Simplified MIME type to record count
    pub content_types: BTreeMap<String, u64>,
    pub depth_distribution: BTreeMap<u32, u64>,
    /// Busiest domains, most records first
    pub top_domains: Vec<(String, u64)>,
}

/// Loads the breakdowns for a run from the record index
///
/// # Arguments
///
/// * `storage` - The run index to query
/// * `run_id` - Run to summarize
///
/// # Returns
///
/// * `Ok(RunBreakdown)` - Successfully computed breakdowns
/// * `Err(StorageError)` - Failed to query the index
pub fn load_breakdown(storage: &dyn Storage, run_id: &str) -> StorageResult<RunBreakdown> {
    let content_types = storage.get_content_type_breakdown(run_id)?;
    let depth_distribution = storage.get_depth_breakdown(run_id)?;
    let domain_counts = storage.get_domain_counts(run_id)?;

    Ok(RunBreakdown {
        content_types,
        depth_distribution,
        top_domains: top_domains(&domain_counts, TOP_DOMAINS),
    })
}

/// Domains sorted by count (descending, then name), truncated to `limit`
pub fn top_domains(counts: &BTreeMap<String, u64>, limit: usize) -> Vec<(String, u64)> {
    let mut domains: Vec<(String, u64)> = counts.iter().map(|(d, c)| (d.clone(), *c)).collect();
    domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    domains.truncate(limit);
    domains
}
