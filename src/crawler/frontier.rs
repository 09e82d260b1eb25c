//! Crawl frontier: the FIFO of admitted URLs plus the visited set and
//! page budgets
//!
//! Admission is a single check-and-insert under one lock, so two workers
//! discovering the same link can never both admit it. A URL is marked
//! visited when it is admitted, not when it is fetched.

use crate::config::CrawlConfig;
use crate::state::ResourceKind;
use crate::url::{extract_domain, normalize_url};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: Url,

    /// Hops from the start URL; assets share the depth of their page
    pub depth: u32,

    /// Domain of `url` (host plus non-default port)
    pub domain: String,

    /// Domain of the page this URL was discovered on; `None` for the seed
    pub parent_domain: Option<String>,

    /// Kind the URL was discovered as
    pub kind: ResourceKind,
}

/// Result of a submission
///
/// Everything except `Admitted` is a silent rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
    TooDeep,
    DomainBudget,
    GlobalBudget,
    /// The frontier was closed or stopped
    Closed,
    /// Not an http(s) URL with a host
    Invalid,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Budgets enforced at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierLimits {
    pub max_depth: u32,
    pub max_pages: u32,
    pub max_pages_per_domain: u32,
}

impl From<&CrawlConfig> for FrontierLimits {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            max_pages_per_domain: config.max_pages_per_domain,
        }
    }
}

/// Point-in-time view of the frontier counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontierSnapshot {
    pub queued: usize,
    pub visited: usize,
    pub in_flight: usize,
    pub total_pages: u32,
    pub closed: bool,
    pub stopped: bool,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<FrontierEntry>,
    visited: HashSet<String>,
    domain_pages: HashMap<String, u32>,
    total_pages: u32,
    in_flight: usize,
    closed: bool,
    stopped: bool,
}

/// Shared crawl frontier
#[derive(Debug)]
pub struct Frontier {
    limits: FrontierLimits,
    inner: Mutex<Inner>,
    notify: Notify,
}

/// An entry handed out by [`Frontier::next`]
///
/// The frontier counts the entry as in flight until the lease is dropped,
/// which keeps it from closing while the holder may still submit children.
#[derive(Debug)]
pub struct Lease<'a> {
    pub entry: FrontierEntry,
    frontier: &'a Frontier,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        {
            let mut inner = self.frontier.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.frontier.notify.notify_waiters();
    }
}

impl Frontier {
    pub fn new(limits: FrontierLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn limits(&self) -> FrontierLimits {
        self.limits
    }

    /// Seeds the frontier with the start URL at depth 0
    pub fn seed(&self, url: &Url) -> Admission {
        self.submit(url, 0, ResourceKind::Page, None)
    }

    /// Offers a discovered URL to the frontier
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL; normalized before the visited check
    /// * `depth` - Depth the entry would be fetched at
    /// * `kind` - `Page` for hyperlinks, an asset kind otherwise
    /// * `parent_domain` - Domain of the page the URL was found on
    ///
    /// Only `Page` entries count against the page budgets.
    pub fn submit(
        &self,
        url: &Url,
        depth: u32,
        kind: ResourceKind,
        parent_domain: Option<&str>,
    ) -> Admission {
        let Ok(normalized) = normalize_url(url.as_str()) else {
            return Admission::Invalid;
        };
        let Some(domain) = extract_domain(&normalized) else {
            return Admission::Invalid;
        };

        let admitted = {
            let mut inner = self.lock();

            if inner.closed {
                return Admission::Closed;
            }
            if depth > self.limits.max_depth {
                return Admission::TooDeep;
            }
            if inner.visited.contains(normalized.as_str()) {
                return Admission::Duplicate;
            }

            if kind.is_page() {
                if inner.total_pages >= self.limits.max_pages {
                    return Admission::GlobalBudget;
                }
                let domain_count = inner.domain_pages.get(&domain).copied().unwrap_or(0);
                if domain_count >= self.limits.max_pages_per_domain {
                    return Admission::DomainBudget;
                }
                inner.total_pages += 1;
                *inner.domain_pages.entry(domain.clone()).or_insert(0) += 1;
            }

            inner.visited.insert(normalized.to_string());
            inner.queue.push_back(FrontierEntry {
                url: normalized,
                depth,
                domain,
                parent_domain: parent_domain.map(str::to_string),
                kind,
            });
            Admission::Admitted
        };

        self.notify.notify_waiters();
        admitted
    }

    /// Waits for the next entry in FIFO order
    ///
    /// Returns `None` once the frontier is closed: either [`close`](Self::close)
    /// was called, or the queue is empty with nothing in flight (the crawl
    /// is exhausted).
    pub async fn next(&self) -> Option<Lease<'_>> {
        loop {
            // Registered before the state check so a wakeup between the check
            // and the await is not lost.
            let notified = self.notify.notified();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(entry) = inner.queue.pop_front() {
                    inner.in_flight += 1;
                    return Some(Lease {
                        entry,
                        frontier: self,
                    });
                }
                if inner.in_flight == 0 {
                    inner.closed = true;
                    drop(inner);
                    self.notify.notify_waiters();
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops the frontier: nothing more is admitted or handed out
    ///
    /// Queued entries are discarded. Leases already handed out stay valid
    /// so in-flight fetches can finish.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            tracing::debug!("Frontier stopped with {} entries queued", inner.queue.len());
            inner.stopped = true;
            inner.closed = true;
            inner.queue.clear();
        }
        self.notify.notify_waiters();
    }

    /// Returns true if [`close`](Self::close) was called
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Returns true if a URL (after normalization) has been admitted
    pub fn contains(&self, url: &Url) -> bool {
        normalize_url(url.as_str())
            .map(|n| self.lock().visited.contains(n.as_str()))
            .unwrap_or(false)
    }

    /// Number of page entries admitted for a domain
    pub fn domain_pages(&self, domain: &str) -> u32 {
        self.lock().domain_pages.get(domain).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        let inner = self.lock();
        FrontierSnapshot {
            queued: inner.queue.len(),
            visited: inner.visited.len(),
            in_flight: inner.in_flight,
            total_pages: inner.total_pages,
            closed: inner.closed,
            stopped: inner.stopped,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
