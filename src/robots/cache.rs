//! Robots.txt caching implementation
//!
//! Rules are fetched once per domain on first use and kept for the lifetime
//! of the run. Concurrent first queries for the same domain share a single
//! fetch.

use super::{fetch_robots, ParsedRobots};
use crate::url::extract_domain;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

type RobotsSlot = Arc<OnceCell<ParsedRobots>>;

/// Per-run robots.txt cache
#[derive(Debug)]
pub struct RobotsCache {
    client: Client,
    /// Product token matched against `User-agent` groups
    agent: String,
    timeout: Duration,
    /// When false every query is answered "allowed, no delay" without I/O
    enabled: bool,
    entries: Mutex<HashMap<String, RobotsSlot>>,
}

impl RobotsCache {
    /// Creates a new cache
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for robots.txt requests
    /// * `agent` - User agent token (the crawler name, without version)
    /// * `timeout` - Per-request timeout for robots.txt
    /// * `enabled` - Whether robots.txt is respected at all
    pub fn new(client: Client, agent: impl Into<String>, timeout: Duration, enabled: bool) -> Self {
        Self {
            client,
            agent: agent.into(),
            timeout,
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if robots.txt handling is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks whether the URL may be fetched
    ///
    /// The first query for a domain fetches its robots.txt. A missing,
    /// unreachable or unreadable file allows everything.
    pub async fn allowed(&self, url: &Url) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(slot) = self.load(url).await else {
            return true;
        };
        slot.get()
            .map_or(true, |robots| robots.is_allowed(url.as_str(), &self.agent))
    }

    /// Crawl delay declared for a domain
    ///
    /// Returns `None` if the domain has not been queried through
    /// [`allowed`](Self::allowed) yet, or if it declares no delay.
    pub fn crawl_delay(&self, domain: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }

        let slot = self.slot_if_present(domain)?;
        slot.get()?.crawl_delay_duration(&self.agent)
    }

    /// Number of domains with a cached (or in-flight) robots.txt
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the domain's slot, fetching robots.txt if this is the first query
    async fn load(&self, url: &Url) -> Option<RobotsSlot> {
        let domain = extract_domain(url)?;
        let slot = self.slot(&domain);

        slot.get_or_init(|| fetch_robots(&self.client, url.scheme(), &domain, self.timeout))
            .await;
        Some(slot)
    }

    fn slot(&self, domain: &str) -> RobotsSlot {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn slot_if_present(&self, domain: &str) -> Option<RobotsSlot> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(domain).cloned()
    }
}
