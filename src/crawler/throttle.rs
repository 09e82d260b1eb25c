//! Per-domain request pacing
//!
//! Each domain keeps the start time of its most recently granted request.
//! A caller reserves the next slot under the lock and sleeps outside it, so
//! concurrent callers for one domain are spaced by at least the delay while
//! other domains proceed independently.

use crate::state::DomainState;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct DomainThrottle {
    domains: Mutex<HashMap<String, DomainState>>,
}

impl DomainThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the domain may be requested again
    ///
    /// # Arguments
    ///
    /// * `domain` - Domain key
    /// * `delay` - Effective delay: the larger of the configured delay and
    ///   the robots.txt crawl-delay
    ///
    /// # Returns
    ///
    /// The reserved request start time.
    pub async fn wait_turn(&self, domain: &str, delay: Duration) -> Instant {
        let slot = {
            let mut domains = self.lock();
            domains
                .entry(domain.to_string())
                .or_default()
                .reserve_slot(Instant::now(), delay)
        };

        tokio::time::sleep_until(tokio::time::Instant::from_std(slot)).await;
        slot
    }

    /// Number of requests granted for a domain so far
    pub fn request_count(&self, domain: &str) -> u32 {
        self.lock()
            .get(domain)
            .map(|state| state.request_count)
            .unwrap_or(0)
    }

    /// How long a new caller for this domain would wait right now
    pub fn pending_wait(&self, domain: &str, delay: Duration) -> Option<Duration> {
        self.lock()
            .get(domain)
            .and_then(|state| state.time_until_next_request(Instant::now(), delay))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DomainState>> {
        match self.domains.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
