use std::time::{Duration, Instant};

/// Tracks request pacing for one network host
///
/// Shared by every source that fetches from the same host. The fetch client
/// holds the host's lock for the whole request, so a `HostState` is only
/// touched by one in-flight request at a time.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Number of requests started against this host since process start
    pub request_count: u64,

    /// Number of those requests that ended in an error
    pub failure_count: u64,

    /// When the last request to this host started
    pub last_request_time: Option<Instant>,
}

impl HostState {
    /// Creates a new HostState with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a request may start now given the minimum spacing
    pub fn can_request(&self, min_delay: Duration, now: Instant) -> bool {
        self.time_until_next_request(min_delay, now).is_none()
    }

    /// Records that a request to this host started at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Records that the last request failed
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, min_delay: Duration, now: Instant) -> Option<Duration> {
        if let Some(last) = self.last_request_time {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < min_delay {
                return Some(min_delay - elapsed);
            }
        }
        None
    }
}
