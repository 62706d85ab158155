//! Robots.txt caching implementation
//!
//! Directives are cached per domain and refetched once older than the
//! configured TTL. A domain whose robots.txt could not be fetched is cached as
//! a permissive entry with `found == false`. Concurrent misses for a domain
//! wait on a single fetch.

use crate::crawler::{Fetcher, RateLimiter};
use crate::robots::RobotsDirectives;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use url::Url;

/// Cached robots.txt data for a domain
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed directives
    pub directives: Arc<RobotsDirectives>,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Creates a new CachedRobots instance stamped with the current time
    pub fn new(directives: RobotsDirectives) -> Self {
        Self {
            directives: Arc::new(directives),
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the entry is older than the TTL
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Returns the age of the cached entry
    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    /// Whether a robots.txt was actually present
    pub fn found(&self) -> bool {
        self.directives.found()
    }
}

/// Per-domain robots.txt cache
///
/// One instance is shared by every crawl worker of a process; the domain map
/// is private and guarded by a mutex.
#[derive(Debug)]
pub struct RobotsCache {
    user_agent: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedRobots>>,
    /// Per-domain locks held while a robots.txt fetch is in flight
    flights: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RobotsCache {
    /// Creates an empty cache
    ///
    /// # Arguments
    ///
    /// * `user_agent` - The crawler's user agent; its product token selects the robots group
    /// * `ttl` - How long fetched directives stay valid
    pub fn new(user_agent: impl Into<String>, ttl: std::time::Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(24)),
            entries: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CachedRobots>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the directives for the URL's domain, fetching robots.txt if needed
    ///
    /// Any non-2xx response or transport failure yields permissive directives.
    pub async fn fetch_and_parse(&self, fetcher: &dyn Fetcher, url: &Url) -> Arc<RobotsDirectives> {
        self.load(fetcher, url, None)
            .await
            .unwrap_or_else(|| Arc::new(RobotsDirectives::allow_all()))
    }

    /// Like `fetch_and_parse`, but the robots.txt request holds the domain's
    /// rate-limit slot like any page request
    ///
    /// # Returns
    ///
    /// * `Some(directives)` - Cached or freshly fetched directives
    /// * `None` - The slot was not acquired within `timeout`; nothing is cached
    pub async fn fetch_and_parse_limited(
        &self,
        fetcher: &dyn Fetcher,
        url: &Url,
        limiter: &RateLimiter,
        timeout: std::time::Duration,
    ) -> Option<Arc<RobotsDirectives>> {
        self.load(fetcher, url, Some((limiter, timeout))).await
    }

    async fn load(
        &self,
        fetcher: &dyn Fetcher,
        url: &Url,
        limiter: Option<(&RateLimiter, std::time::Duration)>,
    ) -> Option<Arc<RobotsDirectives>> {
        let Some(domain) = url.host_str().map(|h| h.to_lowercase()) else {
            return Some(Arc::new(RobotsDirectives::allow_all()));
        };

        if let Some(cached) = self.get(&domain) {
            return Some(cached.directives);
        }

        // One fetch per domain; later callers wait for it and read the cache
        let flight = self.flight(&domain);
        let _flight_guard = flight.lock().await;
        if let Some(cached) = self.get(&domain) {
            return Some(cached.directives);
        }

        let robots_url = match url.port() {
            Some(port) => format!("{}://{}:{}/robots.txt", url.scheme(), domain, port),
            None => format!("{}://{}/robots.txt", url.scheme(), domain),
        };

        let response = match limiter {
            Some((limiter, timeout)) => {
                let Some(_permit) = limiter.acquire_permit(&robots_url, timeout).await else {
                    warn!("Timed out waiting to fetch robots.txt for {}", domain);
                    self.end_flight(&domain, &flight);
                    return None;
                };
                fetcher.fetch(&robots_url).await
            }
            None => fetcher.fetch(&robots_url).await,
        };

        let directives = if response.error.is_none() && (200..300).contains(&response.status_code) {
            debug!("Fetched robots.txt for {}", domain);
            RobotsDirectives::parse(&response.body, &self.user_agent)
        } else {
            match &response.error {
                Some(error) if response.status_code == 0 => {
                    warn!("Failed to fetch robots.txt for {}: {}", domain, error)
                }
                _ => debug!(
                    "No robots.txt for {} (HTTP {}), allowing all",
                    domain, response.status_code
                ),
            }
            RobotsDirectives::allow_all()
        };

        let directives = self.insert(&domain, directives);
        self.end_flight(&domain, &flight);
        Some(directives)
    }

    fn flight(&self, domain: &str) -> Arc<AsyncMutex<()>> {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(flights.entry(domain.to_string()).or_default())
    }

    fn end_flight(&self, domain: &str, flight: &Arc<AsyncMutex<()>>) {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        if flights.get(domain).is_some_and(|f| Arc::ptr_eq(f, flight)) {
            flights.remove(domain);
        }
    }

    /// Returns the fresh cached entry for a domain, if any
    pub fn get(&self, domain: &str) -> Option<CachedRobots> {
        let entries = self.entries();
        entries
            .get(&domain.to_lowercase())
            .filter(|cached| !cached.is_stale(self.ttl))
            .cloned()
    }

    /// Stores directives for a domain, replacing any previous entry
    pub fn insert(&self, domain: &str, directives: RobotsDirectives) -> Arc<RobotsDirectives> {
        let cached = CachedRobots::new(directives);
        let directives = Arc::clone(&cached.directives);
        self.entries().insert(domain.to_lowercase(), cached);
        directives
    }

    /// Checks a URL against its domain's cached directives
    ///
    /// Domains without a cached entry are allowed.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let Some(domain) = parsed.host_str() else {
            return true;
        };

        match self.get(domain) {
            Some(cached) => {
                let path = match parsed.query() {
                    Some(query) => format!("{}?{}", parsed.path(), query),
                    None => parsed.path().to_string(),
                };
                cached.directives.is_allowed(&path)
            }
            None => true,
        }
    }

    /// The cached crawl delay for a domain
    pub fn crawl_delay(&self, domain: &str) -> Option<std::time::Duration> {
        self.get(domain)
            .and_then(|cached| cached.directives.crawl_delay())
    }

    /// Whether a robots.txt was present for a domain (None if never fetched)
    pub fn found(&self, domain: &str) -> Option<bool> {
        self.get(domain).map(|cached| cached.found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{FetchResponse, HttpFetcher};
    use crate::config::UserAgentConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AGENT: &str = "TestBot/1.0";

    struct StaticFetcher {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> FetchResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let error = if (200..300).contains(&self.status) {
                None
            } else {
                Some(format!("HTTP {}", self.status))
            };
            FetchResponse {
                final_url: url.to_string(),
                status_code: self.status,
                body: self.body.to_string(),
                error,
                ..Default::default()
            }
        }
    }

    fn static_fetcher(status: u16, body: &'static str) -> StaticFetcher {
        StaticFetcher {
            status,
            body,
            calls: AtomicUsize::new(0),
        }
    }

    fn ttl() -> std::time::Duration {
        std::time::Duration::from_secs(3600)
    }

    #[test]
    fn test_new_entry_not_stale() {
        let cached = CachedRobots::new(RobotsDirectives::allow_all());
        assert!(!cached.is_stale(Duration::hours(24)));
        assert!(!cached.found());
    }

    #[test]
    fn test_entry_is_stale() {
        let mut cached = CachedRobots::new(RobotsDirectives::allow_all());
        cached.fetched_at = Utc::now() - Duration::hours(25);
        assert!(cached.is_stale(Duration::hours(24)));
        assert!(cached.age().num_hours() >= 24);
    }

    #[test]
    fn test_uncached_domain_allowed() {
        let cache = RobotsCache::new(AGENT, ttl());
        assert!(cache.is_allowed("https://acme.com/admin"));
        assert_eq!(cache.found("acme.com"), None);
    }

    #[tokio::test]
    async fn test_fetch_and_parse_caches_per_domain() {
        let fetcher = static_fetcher(200, "User-agent: *\nDisallow: /admin\nCrawl-delay: 2");
        let cache = RobotsCache::new(AGENT, ttl());
        let url = Url::parse("https://acme.com/").unwrap();

        let directives = cache.fetch_and_parse(&fetcher, &url).await;
        assert!(directives.found());
        cache.fetch_and_parse(&fetcher, &url).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        assert!(!cache.is_allowed("https://acme.com/admin/users"));
        assert!(cache.is_allowed("https://acme.com/about"));
        assert_eq!(
            cache.crawl_delay("acme.com"),
            Some(std::time::Duration::from_secs(2))
        );
        assert_eq!(cache.found("acme.com"), Some(true));
    }

    #[tokio::test]
    async fn test_missing_robots_is_permissive() {
        let fetcher = static_fetcher(404, "not found");
        let cache = RobotsCache::new(AGENT, ttl());
        let url = Url::parse("https://acme.com/").unwrap();

        let directives = cache.fetch_and_parse(&fetcher, &url).await;
        assert!(!directives.found());
        assert!(cache.is_allowed("https://acme.com/admin"));
        assert_eq!(cache.found("acme.com"), Some(false));
    }

    #[tokio::test]
    async fn test_server_error_is_permissive() {
        let fetcher = static_fetcher(503, "User-agent: *\nDisallow: /");
        let cache = RobotsCache::new(AGENT, ttl());
        let url = Url::parse("https://acme.com/").unwrap();

        cache.fetch_and_parse(&fetcher, &url).await;
        assert!(cache.is_allowed("https://acme.com/anything"));
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let fetcher = static_fetcher(200, "User-agent: *\nDisallow: /");
        let cache = RobotsCache::new(AGENT, std::time::Duration::from_secs(0));
        let url = Url::parse("https://acme.com/").unwrap();

        cache.fetch_and_parse(&fetcher, &url).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.fetch_and_parse(&fetcher, &url).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    struct SlowFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, url: &str) -> FetchResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            FetchResponse {
                final_url: url.to_string(),
                status_code: 200,
                body: "User-agent: *\nDisallow: /private".to_string(),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let fetcher = SlowFetcher {
            calls: AtomicUsize::new(0),
        };
        let cache = RobotsCache::new(AGENT, ttl());
        let home = Url::parse("https://acme.test/").unwrap();
        let about = Url::parse("https://acme.test/about").unwrap();

        let (a, b) = tokio::join!(
            cache.fetch_and_parse(&fetcher, &home),
            cache.fetch_and_parse(&fetcher, &about)
        );

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_allowed("/private"));
    }

    #[tokio::test]
    async fn test_limited_fetch_waits_for_domain_slot() {
        let fetcher = static_fetcher(200, "User-agent: *\nDisallow: /admin");
        let cache = RobotsCache::new(AGENT, ttl());
        let limiter = RateLimiter::new(1000.0, 10);
        let url = Url::parse("https://acme.test/").unwrap();
        let short = std::time::Duration::from_millis(50);

        let held = limiter
            .acquire_permit("https://acme.test/page", short)
            .await
            .unwrap();
        let blocked = cache
            .fetch_and_parse_limited(&fetcher, &url, &limiter, short)
            .await;
        assert!(blocked.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.found("acme.test"), None);

        drop(held);
        let directives = cache
            .fetch_and_parse_limited(&fetcher, &url, &limiter, short)
            .await
            .unwrap();
        assert!(!directives.is_allowed("/admin"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.request_count("acme.test"), 2);
    }

    #[tokio::test]
    async fn test_fetch_robots_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("User-agent: TestBot\nDisallow: /private\n"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "bot@example.com".to_string(),
        })
        .unwrap();
        let cache = RobotsCache::new(AGENT, ttl());
        let base = Url::parse(&server.uri()).unwrap();

        cache.fetch_and_parse(&fetcher, &base).await;
        assert!(!cache.is_allowed(&format!("{}/private/x", server.uri())));
        assert!(cache.is_allowed(&format!("{}/public", server.uri())));
    }

    #[tokio::test]
    async fn test_robots_404_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "bot@example.com".to_string(),
        })
        .unwrap();
        let cache = RobotsCache::new(AGENT, ttl());
        let base = Url::parse(&server.uri()).unwrap();

        cache.fetch_and_parse(&fetcher, &base).await;
        assert!(cache.is_allowed(&format!("{}/admin", server.uri())));
    }
}
