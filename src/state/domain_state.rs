use std::time::{Duration, Instant};

/// Politeness state for one domain
///
/// A token bucket (`max_tokens` deep, refilled at `refill_rate` tokens per
/// second) plus an in-flight flag acting as the domain mutex: at most one
/// request per domain is active regardless of how many tokens are available.
/// A robots.txt crawl delay additionally spaces consecutive requests, so the
/// effective gap is `max(1 / refill_rate, crawl_delay)`.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Tokens currently available
    pub tokens: f64,

    /// Bucket capacity
    pub max_tokens: f64,

    /// Tokens added per second
    pub refill_rate: f64,

    /// Robots.txt crawl delay, if the site declared one
    pub crawl_delay: Option<Duration>,

    /// When tokens were last topped up
    pub last_refill: Instant,

    /// Start of the most recent request
    pub last_request_time: Option<Instant>,

    /// Whether a request to this domain is currently in flight
    pub in_flight: bool,

    /// Number of requests started against this domain
    pub request_count: u32,
}

impl DomainState {
    /// Creates a full bucket
    ///
    /// # Arguments
    ///
    /// * `requests_per_second` - Refill rate of the bucket
    /// * `burst` - Bucket capacity (at least one token)
    /// * `now` - The current time instant
    pub fn new(requests_per_second: f64, burst: u32, now: Instant) -> Self {
        let max_tokens = f64::from(burst.max(1));
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate: requests_per_second,
            crawl_delay: None,
            last_refill: now,
            last_request_time: None,
            in_flight: false,
            request_count: 0,
        }
    }

    /// Minimum spacing between two requests to this domain
    pub fn min_interval(&self) -> Duration {
        let bucket = if self.refill_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.refill_rate)
        } else {
            Duration::ZERO
        };
        match self.crawl_delay {
            Some(delay) if delay > bucket => delay,
            _ => bucket,
        }
    }

    /// Adds the tokens accrued since the last refill
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Checks if a request can start right now
    ///
    /// Call `refill` first so the token count is current.
    pub fn can_request(&self, now: Instant) -> bool {
        !self.in_flight && self.time_until_next_request(now).is_none()
    }

    /// Time until the bucket and crawl delay would permit a request
    ///
    /// Returns None if a request can be made now. The in-flight flag is not
    /// considered; a held domain is released by its holder, not by time.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let token_wait = if self.tokens >= 1.0 {
            Duration::ZERO
        } else if self.refill_rate > 0.0 {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        } else {
            Duration::MAX
        };

        let delay_wait = match (self.crawl_delay, self.last_request_time) {
            (Some(delay), Some(last)) => delay.saturating_sub(now.saturating_duration_since(last)),
            _ => Duration::ZERO,
        };

        let wait = token_wait.max(delay_wait);
        if wait.is_zero() {
            None
        } else {
            Some(wait)
        }
    }

    /// Records the start of a request: takes a token and marks the domain busy
    pub fn record_request(&mut self, now: Instant) {
        self.tokens = (self.tokens - 1.0).max(0.0);
        self.in_flight = true;
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Marks the in-flight request as finished
    pub fn finish_request(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_domain_state() {
        let now = Instant::now();
        let state = DomainState::new(2.0, 3, now);
        assert_eq!(state.tokens, 3.0);
        assert_eq!(state.max_tokens, 3.0);
        assert_eq!(state.request_count, 0);
        assert!(!state.in_flight);
        assert!(state.can_request(now));
    }

    #[test]
    fn test_zero_burst_still_holds_one_token() {
        let state = DomainState::new(1.0, 0, Instant::now());
        assert_eq!(state.max_tokens, 1.0);
    }

    #[test]
    fn test_in_flight_blocks_regardless_of_tokens() {
        let now = Instant::now();
        let mut state = DomainState::new(10.0, 5, now);
        state.record_request(now);

        assert!(state.tokens >= 1.0);
        assert!(!state.can_request(now));

        state.finish_request();
        assert!(state.can_request(now));
    }

    #[test]
    fn test_bucket_empties_and_refills() {
        let now = Instant::now();
        let mut state = DomainState::new(1.0, 1, now);

        state.record_request(now);
        state.finish_request();
        assert!(!state.can_request(now));
        assert_eq!(
            state.time_until_next_request(now),
            Some(Duration::from_secs(1))
        );

        let half = now + Duration::from_millis(500);
        state.refill(half);
        assert!(!state.can_request(half));

        let later = now + Duration::from_millis(1001);
        state.refill(later);
        assert!(state.can_request(later));
    }

    #[test]
    fn test_refill_caps_at_max_tokens() {
        let now = Instant::now();
        let mut state = DomainState::new(5.0, 2, now);
        state.refill(now + Duration::from_secs(60));
        assert_eq!(state.tokens, 2.0);
    }

    #[test]
    fn test_crawl_delay_spaces_requests() {
        let now = Instant::now();
        let mut state = DomainState::new(10.0, 10, now);
        state.crawl_delay = Some(Duration::from_secs(2));

        state.record_request(now);
        state.finish_request();

        let soon = now + Duration::from_millis(500);
        state.refill(soon);
        assert!(state.tokens >= 1.0);
        assert!(!state.can_request(soon));
        assert_eq!(
            state.time_until_next_request(soon),
            Some(Duration::from_millis(1500))
        );

        let later = now + Duration::from_secs(2);
        state.refill(later);
        assert!(state.can_request(later));
    }

    #[test]
    fn test_min_interval_is_max_of_rate_and_delay() {
        let now = Instant::now();
        let mut state = DomainState::new(2.0, 1, now);
        assert_eq!(state.min_interval(), Duration::from_millis(500));

        state.crawl_delay = Some(Duration::from_secs(3));
        assert_eq!(state.min_interval(), Duration::from_secs(3));

        state.crawl_delay = Some(Duration::from_millis(100));
        assert_eq!(state.min_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_record_request_counts() {
        let now = Instant::now();
        let mut state = DomainState::new(100.0, 5, now);
        state.record_request(now);
        state.finish_request();
        state.record_request(now);
        assert_eq!(state.request_count, 2);
        assert_eq!(state.last_request_time, Some(now));
        assert_eq!(state.tokens, 3.0);
    }
}
