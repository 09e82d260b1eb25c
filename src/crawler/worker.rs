//! Fetch workers
//!
//! Each worker repeatedly leases an entry from the frontier and drives it
//! to exactly one terminal outcome: robots check, throttle, fetch, then
//! extraction, optimization and storage on the blocking pool. Discovered
//! children are submitted before the lease is released, so the frontier
//! cannot close while a page may still add work.

use crate::crawler::extractor::{extract, extract_stylesheet, Extracted};
use crate::crawler::{DomainThrottle, FetchResult, Fetcher, Frontier, FrontierEntry};
use crate::optimizer::Optimizer;
use crate::robots::RobotsCache;
use crate::state::ResourceKind;
use crate::storage::{RecordMeta, RunStore};
use crate::url::extract_domain;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use url::Url;

/// Redirect hops followed for one entry
const MAX_REDIRECTS: usize = 10;

/// Everything a worker shares with the rest of the run
pub struct WorkerContext {
    pub frontier: Arc<Frontier>,
    pub robots: Arc<RobotsCache>,
    pub throttle: Arc<DomainThrottle>,
    pub fetcher: Arc<Fetcher>,
    pub optimizer: Optimizer,
    pub store: Arc<RunStore>,
    /// Configured politeness delay
    pub request_delay: Duration,
    pub skip_assets: bool,
}

/// URLs found in a stored resource
#[derive(Debug, Default)]
struct Discovered {
    links: Vec<Url>,
    assets: Vec<(Url, ResourceKind)>,
}

/// Runs `count` workers until the frontier closes
///
/// # Returns
///
/// The number of entries handled across all workers.
pub async fn run_workers(ctx: Arc<WorkerContext>, count: usize) -> usize {
    let mut workers = JoinSet::new();
    for id in 0..count.max(1) {
        let ctx = Arc::clone(&ctx);
        workers.spawn(async move { worker_loop(id, ctx).await });
    }

    let mut handled = 0;
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(n) => handled += n,
            Err(e) => tracing::error!("Worker task failed: {}", e),
        }
    }
    handled
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>) -> usize {
    let mut handled = 0;

    while let Some(lease) = ctx.frontier.next().await {
        process_entry(&ctx, &lease.entry).await;
        handled += 1;

        if let Some(reason) = ctx.store.systemic_error() {
            if !ctx.frontier.is_stopped() {
                tracing::error!("Stopping crawl: {}", reason);
                ctx.frontier.close();
            }
        }
    }

    tracing::debug!("Worker {} finished after {} entries", id, handled);
    handled
}

/// Whether a URL may be requested now
enum Gate {
    Open,
    Disallowed,
    Stopped,
}

/// Robots check, then the domain's turn
async fn wait_for_gate(ctx: &WorkerContext, url: &Url, domain: &str) -> Gate {
    if !ctx.robots.allowed(url).await {
        return Gate::Disallowed;
    }

    let robots_delay = ctx.robots.crawl_delay(domain).unwrap_or(Duration::ZERO);
    let delay = ctx.request_delay.max(robots_delay);
    ctx.throttle.wait_turn(domain, delay).await;

    // Stopped while waiting for the domain: leave it unfetched
    if ctx.frontier.is_stopped() {
        return Gate::Stopped;
    }
    Gate::Open
}

async fn process_entry(ctx: &WorkerContext, entry: &FrontierEntry) {
    let url = &entry.url;
    let mut meta = RecordMeta::new(url.as_str(), &entry.domain, entry.depth, entry.kind);

    // Same-domain redirects are followed here, each hop passing the gate.
    // A redirect to another domain goes back to the frontier instead.
    let mut target = url.clone();
    let mut redirects = 0;
    let (content_type, body) = loop {
        match wait_for_gate(ctx, &target, &entry.domain).await {
            Gate::Open => {}
            Gate::Disallowed => {
                let reason = if redirects == 0 {
                    tracing::info!("URL {} disallowed by robots.txt", url);
                    "Disallowed by robots.txt".to_string()
                } else {
                    tracing::info!("Redirect from {} to {} disallowed by robots.txt", url, target);
                    format!("Redirect to {} disallowed by robots.txt", target)
                };
                if let Err(e) = ctx.store.record_skipped(meta, &reason) {
                    tracing::warn!("Failed to record skipped {}: {}", url, e);
                }
                return;
            }
            Gate::Stopped => {
                tracing::debug!("Dropping {} after stop", url);
                return;
            }
        }

        meta.fetched_at = Utc::now();
        tracing::debug!("Fetching {} (depth {}, {})", target, entry.depth, entry.kind);

        match ctx.fetcher.fetch(target.as_str()).await {
            FetchResult::Success {
                content_type, body, ..
            } => break (content_type, body),
            FetchResult::Failed {
                error, attempts, ..
            } => {
                tracing::warn!("Failed to fetch {} after {} attempts: {}", target, attempts, error);
                if let Err(e) = ctx.store.record_failure(meta, &error) {
                    tracing::warn!("Failed to record failure for {}: {}", url, e);
                }
                return;
            }
            FetchResult::Redirect {
                location,
                status_code,
                ..
            } => {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    tracing::warn!("Too many redirects from {}", url);
                    if let Err(e) = ctx.store.record_failure(meta, "Too many redirects") {
                        tracing::warn!("Failed to record failure for {}: {}", url, e);
                    }
                    return;
                }

                if extract_domain(&location).as_deref() != Some(entry.domain.as_str()) {
                    hand_off_redirect(ctx, entry, meta, &location);
                    return;
                }
                tracing::debug!("{} redirected ({}) to {}", target, status_code, location);
                target = location;
            }
        }
    };

    let mut kind = ResourceKind::classify(entry.kind, content_type.as_deref(), &target);
    // HTML reached through an asset reference is stored but not followed
    if kind.is_page() && !entry.kind.is_page() {
        kind = ResourceKind::Other;
    }

    let store = Arc::clone(&ctx.store);
    let optimizer = ctx.optimizer;
    let skip_assets = ctx.skip_assets;
    let stored = tokio::task::spawn_blocking(move || {
        store_resource(&store, optimizer, body, kind, content_type, &target, meta, skip_assets)
    })
    .await;

    let discovered = match stored {
        Ok(Some(discovered)) => discovered,
        Ok(None) => return,
        Err(e) => {
            tracing::error!("Processing task for {} failed: {}", url, e);
            return;
        }
    };

    submit_children(ctx, entry, discovered);
}

/// Submits a cross-domain redirect target as a new entry
///
/// The target is subject to the frontier's dedup and budgets like any other
/// discovered URL. The redirecting entry itself is recorded as skipped.
fn hand_off_redirect(ctx: &WorkerContext, entry: &FrontierEntry, meta: RecordMeta, location: &Url) {
    let admission = ctx
        .frontier
        .submit(location, entry.depth, entry.kind, Some(entry.domain.as_str()));
    tracing::debug!(
        "{} redirects to {} on another domain ({:?})",
        entry.url,
        location,
        admission
    );

    if let Err(e) = ctx
        .store
        .record_skipped(meta, &format!("Redirected to {}", location))
    {
        tracing::warn!("Failed to record skipped {}: {}", entry.url, e);
    }
}

/// Extracts children, optimizes and stores one fetched resource
///
/// Returns `None` if storing failed; the failure is already recorded.
#[allow(clippy::too_many_arguments)]
fn store_resource(
    store: &RunStore,
    optimizer: Optimizer,
    body: Vec<u8>,
    mut kind: ResourceKind,
    content_type: Option<String>,
    base: &Url,
    mut meta: RecordMeta,
    skip_assets: bool,
) -> Option<Discovered> {
    let mut discovered = Discovered::default();

    match kind {
        ResourceKind::Page => match extract(&body, base) {
            Extracted::Document(doc) => {
                meta.title = doc.title;
                discovered.links = doc.links;
                if !skip_assets {
                    discovered.assets = doc.assets;
                }
            }
            Extracted::Unparseable => {
                tracing::debug!("{} is not parseable HTML, storing as-is", meta.url);
                kind = ResourceKind::Other;
            }
        },
        ResourceKind::Css if !skip_assets => {
            discovered.assets = extract_stylesheet(&body, base);
        }
        _ => {}
    }

    let optimized = optimizer.optimize(&body, kind, content_type.as_deref());
    meta.kind = kind;
    meta.original_size = body.len() as u64;
    meta.content_type = optimized.content_type.or(content_type);
    meta.soft_failure = optimized.soft_failure;

    let url = meta.url.clone();
    match store.put(&optimized.bytes, meta) {
        Ok(hash) => {
            tracing::debug!(
                "Stored {} as {} ({} -> {} bytes)",
                url,
                hash,
                body.len(),
                optimized.bytes.len()
            );
            Some(discovered)
        }
        Err(e) => {
            tracing::warn!("Failed to store {}: {}", url, e);
            None
        }
    }
}

fn submit_children(ctx: &WorkerContext, entry: &FrontierEntry, discovered: Discovered) {
    let parent = Some(entry.domain.as_str());
    let mut admitted = 0;

    for link in &discovered.links {
        if ctx
            .frontier
            .submit(link, entry.depth + 1, ResourceKind::Page, parent)
            .is_admitted()
        {
            admitted += 1;
        }
    }
    for (asset, kind) in &discovered.assets {
        if ctx.frontier.submit(asset, entry.depth, *kind, parent).is_admitted() {
            admitted += 1;
        }
    }

    tracing::debug!(
        "{}: {} links, {} assets, {} admitted",
        entry.url,
        discovered.links.len(),
        discovered.assets.len(),
        admitted
    );
}
