//! Crawl coordinator - one run from seed to archive
//!
//! This module wires the pieces of a run together:
//! - Validating the crawl settings and registering the run in the index
//! - Building the shared frontier, robots cache, throttle and fetcher
//! - Running the worker pool until the frontier closes or is stopped
//! - Freezing statistics, writing the archive and recording the outcome

use crate::archive::{build_archive, ArchiveReport, ArchiveResult, RunMetadata, FORMAT_VERSION};
use crate::config::{
    compute_crawl_config_hash, validate_crawl_config, Config, CrawlConfig, ServiceConfig,
};
use crate::crawler::worker::{run_workers, WorkerContext};
use crate::crawler::{
    build_http_client, build_robots_client, DomainThrottle, Fetcher, Frontier, FrontierLimits,
};
use crate::optimizer::Optimizer;
use crate::output::{Stats, StatsTracker};
use crate::robots::RobotsCache;
use crate::storage::{
    open_storage, ContentStore, RunStatus, RunStore, SqliteStorage, Storage, StorageResult,
};
use crate::url::normalize_url;
use crate::ScrollError;
use chrono::{SecondsFormat, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub stats: Stats,
    /// Written archive, if packaging succeeded
    pub archive: Option<ArchiveReport>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn archive_path(&self) -> Option<&PathBuf> {
        self.archive.as_ref().map(|a| &a.path)
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    run_id: String,
    started_at: String,
    start_url: Url,
    config: CrawlConfig,
    config_hash: String,
    archive_path: PathBuf,
    index: Arc<Mutex<SqliteStorage>>,
    frontier: Arc<Frontier>,
    stats: Arc<StatsTracker>,
    store: Arc<RunStore>,
    ctx: Arc<WorkerContext>,
}

impl Coordinator {
    /// Creates a new coordinator and registers its run
    ///
    /// # Arguments
    ///
    /// * `config` - Crawl settings for this run
    /// * `service` - User agent, output locations and fetch behaviour
    /// * `index` - The run index database
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Run registered as `running`, ready to start
    /// * `Err(ScrollError)` - Invalid settings or storage could not be set up;
    ///   no run row is left behind for invalid settings
    pub fn new(
        config: CrawlConfig,
        service: &ServiceConfig,
        index: Arc<Mutex<SqliteStorage>>,
    ) -> Result<Self, ScrollError> {
        validate_crawl_config(&config)?;
        let start_url = normalize_url(&config.start_url)?;

        let client = build_http_client(&service.user_agent, &service.fetch)?;
        let config_json = serde_json::to_string(&config)?;
        let config_hash = compute_crawl_config_hash(&config);

        let (run_id, started_at) = {
            let mut storage = lock(&index);
            let run_id = next_run_id(&*storage)?;
            storage.create_run(&run_id, start_url.as_str(), &config_json, &config_hash)?;
            let started_at = storage.get_run(&run_id)?.started_at;
            (run_id, started_at)
        };

        let content = ContentStore::open(service.output.run_dir(&run_id))?;
        let stats = Arc::new(StatsTracker::new());
        let store = Arc::new(RunStore::new(
            run_id.clone(),
            content,
            Arc::clone(&index),
            Arc::clone(&stats),
        ));
        let frontier = Arc::new(Frontier::new(FrontierLimits::from(&config)));

        let robots = RobotsCache::new(
            build_robots_client(&service.user_agent, &service.fetch)?,
            service.user_agent.crawler_name.clone(),
            Duration::from_secs(service.fetch.robots_timeout_secs),
            config.respect_robots_txt,
        );

        let ctx = Arc::new(WorkerContext {
            frontier: Arc::clone(&frontier),
            robots: Arc::new(robots),
            throttle: Arc::new(DomainThrottle::new()),
            fetcher: Arc::new(Fetcher::from_config(client, &service.fetch)),
            optimizer: Optimizer::from_config(&config),
            store: Arc::clone(&store),
            request_delay: config.request_delay_duration(),
            skip_assets: config.skip_assets,
        });

        Ok(Self {
            archive_path: service.output.archive_path(&run_id),
            run_id,
            started_at,
            start_url,
            config,
            config_hash,
            index,
            frontier,
            stats,
            store,
            ctx,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run's frontier; closing it stops the run cooperatively
    pub fn frontier(&self) -> Arc<Frontier> {
        Arc::clone(&self.frontier)
    }

    /// Live statistics of the run
    pub fn stats(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.stats)
    }

    /// Runs the crawl to its end and packages the archive
    ///
    /// Never returns an error: failures end up in the outcome's status and
    /// error, and on the run row.
    pub async fn run(self) -> RunOutcome {
        tracing::info!(
            "Starting run {} at {} with {} workers",
            self.run_id,
            self.start_url,
            self.config.max_workers
        );

        if !self.frontier.seed(&self.start_url).is_admitted() {
            tracing::warn!("Start URL {} was not admitted", self.start_url);
        }
        let handled = run_workers(Arc::clone(&self.ctx), self.config.max_workers as usize).await;

        let mut error = self.store.systemic_error();
        let mut status = if error.is_some() {
            RunStatus::Failed
        } else if self.frontier.is_stopped() {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        let mut stats = self.stats.freeze();
        tracing::info!(
            "Run {} {}: {} entries handled, {} stored, {} failed, {} skipped in {:.2}s",
            self.run_id,
            status.to_db_string(),
            handled,
            stats.pages_scraped,
            stats.pages_failed,
            stats.pages_skipped,
            stats.elapsed_seconds
        );

        let metadata_base = RunMetadata {
            format_version: FORMAT_VERSION,
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            start_url: self.start_url.to_string(),
            status,
            config: self.config.clone(),
            config_hash: self.config_hash.clone(),
            stats: stats.clone(),
            error: error.clone(),
            records: Vec::new(),
        };
        let index = Arc::clone(&self.index);
        let store = Arc::clone(&self.store);
        let archive_path = self.archive_path.clone();
        let level = self.config.compression_level;

        let packaged = tokio::task::spawn_blocking(move || {
            package(&index, &store, metadata_base, &archive_path, level)
        })
        .await;

        let archive = match packaged {
            Ok(Ok(report)) => {
                stats.compression = Some(report.compression);
                Some(report)
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to write archive for run {}: {}", self.run_id, e);
                if error.is_none() {
                    error = Some(format!("Archive failed: {}", e));
                    status = RunStatus::Failed;
                }
                None
            }
            Err(e) => {
                tracing::error!("Archive task for run {} failed: {}", self.run_id, e);
                if error.is_none() {
                    error = Some(format!("Archive task failed: {}", e));
                    status = RunStatus::Failed;
                }
                None
            }
        };

        let archive_path = archive
            .as_ref()
            .map(|a| a.path.to_string_lossy().into_owned());
        let finished = lock(&self.index).finish_run(
            &self.run_id,
            status,
            &stats,
            archive_path.as_deref(),
            error.as_deref(),
        );
        if let Err(e) = finished {
            tracing::error!("Failed to record end of run {}: {}", self.run_id, e);
        }

        RunOutcome {
            run_id: self.run_id,
            status,
            stats,
            archive,
            error,
        }
    }
}

/// Loads the record index and writes the run's archive
fn package(
    index: &Mutex<SqliteStorage>,
    store: &RunStore,
    mut metadata: RunMetadata,
    archive_path: &std::path::Path,
    level: i32,
) -> ArchiveResult<ArchiveReport> {
    metadata.records = lock(index).get_records(&metadata.run_id)?;
    build_archive(&metadata, store.content(), archive_path, level)
}

/// Timestamp-derived run id, suffixed if a run with that id already exists
fn next_run_id(storage: &dyn Storage) -> StorageResult<String> {
    let base = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = base.clone();
    let mut n = 1;
    while storage.get_run(&candidate).is_ok() {
        n += 1;
        candidate = format!("{}_{}", base, n);
    }
    Ok(candidate)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Runs one complete crawl from a loaded configuration
///
/// This function orchestrates the entire crawl process:
///
/// 1. Open the run index under the data directory
/// 2. Register the run and build the shared crawl state
/// 3. Run the worker pool until the frontier is exhausted
/// 4. Write the archive and record the outcome
///
/// # Arguments
///
/// * `config` - The loaded configuration
///
/// # Returns
///
/// * `Ok(RunOutcome)` - The run ended (check its status)
/// * `Err(ScrollError)` - The run could not be started
///
/// # Example
///
/// ```no_run
/// use sumi_scroll::config::load_config;
/// use sumi_scroll::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("config.toml"))?;
/// let outcome = run_crawl(config).await?;
/// println!("{} finished: {:?}", outcome.run_id, outcome.status);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config) -> Result<RunOutcome, ScrollError> {
    let service = config.service();
    let index = open_storage(&service.output.database_path())?;
    let coordinator = Coordinator::new(config.crawl, &service, Arc::new(Mutex::new(index)))?;
    Ok(coordinator.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> ServiceConfig {
        ServiceConfig {
            output: OutputConfig {
                data_dir: dir.path().join("data").to_string_lossy().into_owned(),
                archive_dir: dir.path().join("archives").to_string_lossy().into_owned(),
            },
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_leaves_no_run() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));

        let mut config = CrawlConfig::new("ftp://example.com/");
        let result = Coordinator::new(config.clone(), &service(&dir), Arc::clone(&index));
        assert!(matches!(result, Err(ScrollError::Config(_))));

        config.start_url = "https://example.com/".to_string();
        config.max_workers = 0;
        assert!(Coordinator::new(config, &service(&dir), Arc::clone(&index)).is_err());

        assert!(index.lock().unwrap().list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_run_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let config = CrawlConfig::new("https://example.com/");

        let first = Coordinator::new(config.clone(), &service(&dir), Arc::clone(&index)).unwrap();
        let second = Coordinator::new(config, &service(&dir), Arc::clone(&index)).unwrap();
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(index.lock().unwrap().list_runs().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_start_url_completes_with_failure_record() {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let mut svc = service(&dir);
        svc.fetch.max_retries = 0;
        svc.fetch.connect_timeout_secs = 1;
        let mut config = CrawlConfig::new("http://127.0.0.1:9/");
        config.request_delay = 0.0;

        let coordinator = Coordinator::new(config, &svc, Arc::clone(&index)).unwrap();
        let run_id = coordinator.run_id().to_string();
        let outcome = coordinator.run().await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.stats.pages_failed, 1);
        assert!(outcome.archive_path().is_some_and(|p| p.is_file()));

        let run = index.lock().unwrap().get_run(&run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.stats.unwrap().pages_failed, 1);
    }
}
