use std::time::{Duration, Instant};

/// Tracks the politeness state of a domain during a run
///
/// The domain throttle keeps one of these per domain behind its lock. A
/// request slot is reserved, not observed: the reservation moves
/// `last_request_time` forward before the caller sleeps, so a second worker
/// arriving in the meantime queues behind it instead of racing it.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of requests made to this domain in the current run
    pub request_count: u32,

    /// Start time of the most recently reserved request slot
    pub last_request_time: Option<Instant>,
}

impl DomainState {
    /// Creates a new DomainState with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next request slot for this domain
    ///
    /// # Arguments
    ///
    /// * `now` - The current time instant
    /// * `delay` - Minimum spacing between request starts
    ///
    /// # Returns
    ///
    /// The instant at which the caller may start its request: `now` if the
    /// domain is idle, otherwise `delay` after the previous slot.
    pub fn reserve_slot(&mut self, now: Instant, delay: Duration) -> Instant {
        let slot = match self.last_request_time {
            Some(last) => (last + delay).max(now),
            None => now,
        };
        self.last_request_time = Some(slot);
        self.request_count += 1;
        slot
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, now: Instant, delay: Duration) -> Option<Duration> {
        let last = self.last_request_time?;
        let ready = last + delay;
        if ready > now {
            Some(ready - now)
        } else {
            None
        }
    }
}
