//! Per-domain politeness limiter
//!
//! Each domain gets a token bucket and an exclusive in-flight slot. Blocking
//! acquisition waits for whichever of the two is missing, but never longer
//! than the caller's timeout.

use crate::state::DomainState;
use crate::url::domain_of;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Token bucket + domain mutex rate limiter
///
/// One instance is shared by every worker in the process, so two jobs
/// crawling the same site still take turns.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_second: f64,
    burst: u32,
    domains: Mutex<HashMap<String, DomainState>>,
    released: Notify,
}

/// Why an acquisition attempt could not proceed
enum Busy {
    /// Another request to the domain is in flight
    InFlight,
    /// The bucket or crawl delay needs this much more time
    Wait(Duration),
}

impl RateLimiter {
    /// Creates a limiter
    ///
    /// # Arguments
    ///
    /// * `requests_per_second` - Refill rate of each domain's bucket
    /// * `burst` - Capacity of each domain's bucket
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
            domains: Mutex::new(HashMap::new()),
            released: Notify::new(),
        }
    }

    fn domains(&self) -> MutexGuard<'_, HashMap<String, DomainState>> {
        self.domains.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_take(&self, domain: &str) -> Result<(), Busy> {
        let now = Instant::now();
        let mut domains = self.domains();
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(self.requests_per_second, self.burst, now));

        if state.in_flight {
            return Err(Busy::InFlight);
        }

        state.refill(now);
        match state.time_until_next_request(now) {
            None => {
                state.record_request(now);
                Ok(())
            }
            Some(wait) => Err(Busy::Wait(wait)),
        }
    }

    /// Acquires the right to fetch a URL
    ///
    /// Non-blocking mode fails immediately if the bucket is empty or another
    /// request to the domain is in flight. Blocking mode waits up to `timeout`.
    /// Every successful acquire must be paired with `release`.
    ///
    /// # Returns
    ///
    /// * `true` - The caller may fetch now
    /// * `false` - Not acquired (busy, timed out, or the URL has no host)
    pub async fn acquire(&self, url: &str, blocking: bool, timeout: Duration) -> bool {
        let Some(domain) = domain_of(url) else {
            warn!("Cannot rate limit URL without a host: {}", url);
            return false;
        };

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Registered before checking so a release in between is not missed
            let released = self.released.notified();

            let wait = match self.try_take(&domain) {
                Ok(()) => {
                    trace!("Acquired {}", domain);
                    return true;
                }
                Err(_) if !blocking => return false,
                Err(Busy::InFlight) => None,
                Err(Busy::Wait(wait)) => Some(wait),
            };

            let now = tokio::time::Instant::now();
            if now >= deadline {
                debug!("Timed out waiting for {}", domain);
                return false;
            }
            let remaining = deadline - now;
            let sleep_for = wait.map_or(remaining, |w| w.min(remaining));

            trace!("Waiting up to {:?} for {}", sleep_for, domain);
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Acquires with blocking and returns a guard that releases on drop
    pub async fn acquire_permit(&self, url: &str, timeout: Duration) -> Option<DomainPermit<'_>> {
        if self.acquire(url, true, timeout).await {
            domain_of(url).map(|domain| DomainPermit {
                limiter: self,
                domain,
            })
        } else {
            None
        }
    }

    /// Releases the domain slot taken by `acquire`
    pub fn release(&self, url: &str) {
        if let Some(domain) = domain_of(url) {
            self.release_domain(&domain);
        }
    }

    fn release_domain(&self, domain: &str) {
        if let Some(state) = self.domains().get_mut(domain) {
            state.finish_request();
        }
        self.released.notify_waiters();
    }

    /// Applies a robots.txt crawl delay to a domain
    ///
    /// Non-positive values clear the delay.
    pub fn set_crawl_delay(&self, domain: &str, seconds: f64) {
        let now = Instant::now();
        let mut domains = self.domains();
        let state = domains
            .entry(domain.to_lowercase())
            .or_insert_with(|| DomainState::new(self.requests_per_second, self.burst, now));

        state.crawl_delay = if seconds.is_finite() && seconds > 0.0 {
            Some(Duration::from_secs_f64(seconds))
        } else {
            None
        };
        debug!("Crawl delay for {} set to {:?}", domain, state.crawl_delay);
    }

    /// Minimum spacing currently enforced for a domain
    pub fn min_interval(&self, domain: &str) -> Option<Duration> {
        self.domains().get(domain).map(|state| state.min_interval())
    }

    /// Number of requests started against a domain
    pub fn request_count(&self, domain: &str) -> u32 {
        self.domains()
            .get(domain)
            .map(|state| state.request_count)
            .unwrap_or(0)
    }
}

/// RAII guard for an acquired domain slot
#[derive(Debug)]
pub struct DomainPermit<'a> {
    limiter: &'a RateLimiter,
    domain: String,
}

impl DomainPermit<'_> {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Drop for DomainPermit<'_> {
    fn drop(&mut self) {
        self.limiter.release_domain(&self.domain);
    }
}
