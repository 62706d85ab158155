//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run full crawl
//! sessions through the default HTTP fetcher.

use company_intel::config::{CrawlConfig, UserAgentConfig};
use company_intel::crawler::{CrawlWorker, HttpFetcher, RateLimiter, StopReason};
use company_intel::robots::RobotsCache;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

fn crawl_config(max_pages: u32) -> CrawlConfig {
    CrawlConfig {
        max_pages,
        max_depth: 3,
        requests_per_second: 1000.0,
        burst: 10,
        acquire_timeout_secs: 5,
        ..CrawlConfig::default()
    }
}

fn worker(config: CrawlConfig) -> CrawlWorker {
    CrawlWorker::new(
        config,
        Arc::new(HttpFetcher::new(&user_agent()).unwrap()),
        Arc::new(RateLimiter::new(1000.0, 10)),
        Arc::new(RobotsCache::new("TestBot", Duration::from_secs(3600))),
    )
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/html"),
        )
        .mount(server)
        .await;
}

async fn mount_robots(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

/// How many times the server saw a GET for `route`
async fn hits(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

/// Home page linking to about, team and a blog post
async fn four_page_site() -> MockServer {
    let server = MockServer::start().await;
    mount_robots(&server, 404, "").await;
    mount_page(
        &server,
        "/",
        r#"<html><head><title>Acme</title></head><body>
            <a href="/blog/post1">Latest post</a>
            <a href="/about">About us</a>
            <a href="/team">Our team</a>
        </body></html>"#,
    )
    .await;
    mount_page(&server, "/about", "<html><body>Acme makes anvils.</body></html>").await;
    mount_page(&server, "/team", "<html><body>Wile E. Coyote, CEO</body></html>").await;
    mount_page(&server, "/blog/post1", "<html><body>New anvils shipped</body></html>").await;
    server
}

#[tokio::test]
async fn test_max_pages_prefers_high_value_pages() {
    let server = four_page_site().await;
    let start = format!("{}/", server.uri());

    let outcome = worker(crawl_config(3)).crawl(&start, None).await;

    assert_eq!(outcome.stop_reason, StopReason::MaxPages);
    assert_eq!(outcome.progress.pages_crawled, 3);
    assert_eq!(hits(&server, "/").await, 1);
    assert_eq!(hits(&server, "/about").await, 1);
    assert_eq!(hits(&server, "/team").await, 1);
    assert_eq!(hits(&server, "/blog/post1").await, 0);

    // The blog post is still queued for a later session
    assert!(outcome
        .checkpoint
        .pages_queued
        .iter()
        .any(|url| url.ends_with("/blog/post1")));
}

#[tokio::test]
async fn test_full_crawl_completes() {
    let server = four_page_site().await;
    let start = format!("{}/", server.uri());

    let outcome = worker(crawl_config(50)).crawl(&start, None).await;

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.pages.len(), 4);
    assert!(outcome.pages.iter().all(|page| page.is_success()));
    let home = outcome
        .pages
        .iter()
        .find(|page| page.depth == 0)
        .unwrap();
    assert_eq!(home.title.as_deref(), Some("Acme"));
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;
    mount_robots(&server, 404, "Not Found").await;
    mount_page(&server, "/", r#"<html><body><a href="/admin">Admin</a></body></html>"#).await;
    mount_page(&server, "/admin", "<html><body>Admin area</body></html>").await;

    let robots = Arc::new(RobotsCache::new("TestBot", Duration::from_secs(3600)));
    let worker = CrawlWorker::new(
        crawl_config(10),
        Arc::new(HttpFetcher::new(&user_agent()).unwrap()),
        Arc::new(RateLimiter::new(1000.0, 10)),
        Arc::clone(&robots),
    );
    let outcome = worker.crawl(&format!("{}/", server.uri()), None).await;

    assert_eq!(hits(&server, "/admin").await, 1);
    assert!(robots.is_allowed(&format!("{}/admin", server.uri())));
    assert_eq!(outcome.progress.errors_count, 0);
}

#[tokio::test]
async fn test_robots_disallow_is_respected() {
    let server = MockServer::start().await;
    mount_robots(
        &server,
        200,
        "User-agent: *\nDisallow: /private\nAllow: /private/press",
    )
    .await;
    mount_page(
        &server,
        "/",
        r#"<html><body>
            <a href="/private/plans">Plans</a>
            <a href="/private/press">Press kit</a>
        </body></html>"#,
    )
    .await;
    mount_page(&server, "/private/plans", "<html><body>Secret</body></html>").await;
    mount_page(&server, "/private/press", "<html><body>Press kit</body></html>").await;

    let outcome = worker(crawl_config(10))
        .crawl(&format!("{}/", server.uri()), None)
        .await;

    assert_eq!(hits(&server, "/private/plans").await, 0);
    assert_eq!(hits(&server, "/private/press").await, 1);
    assert_eq!(hits(&server, "/robots.txt").await, 1);

    let blocked = outcome
        .pages
        .iter()
        .find(|page| page.url.ends_with("/private/plans"))
        .unwrap();
    assert_eq!(blocked.error.as_deref(), Some("Disallowed by robots.txt"));
    assert_eq!(outcome.progress.errors_count, 0);
}

#[tokio::test]
async fn test_server_errors_do_not_abort_crawl() {
    let server = MockServer::start().await;
    mount_robots(&server, 404, "").await;
    mount_page(
        &server,
        "/",
        r#"<html><body><a href="/broken">Broken</a><a href="/contact">Contact</a></body></html>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_page(&server, "/contact", "<html><body>Call us</body></html>").await;

    let outcome = worker(crawl_config(10))
        .crawl(&format!("{}/", server.uri()), None)
        .await;

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.progress.errors_count, 1);
    let broken = outcome
        .pages
        .iter()
        .find(|page| page.url.ends_with("/broken"))
        .unwrap();
    assert_eq!(broken.status_code, Some(500));
    assert!(broken.error.is_some());
    assert_eq!(hits(&server, "/contact").await, 1);
}

#[tokio::test]
async fn test_duplicate_content_recorded_once() {
    let server = MockServer::start().await;
    mount_robots(&server, 404, "").await;
    mount_page(
        &server,
        "/",
        r#"<html><body><a href="/one">One</a><a href="/two">Two</a></body></html>"#,
    )
    .await;
    mount_page(&server, "/one", "<html><body>Hello   World</body></html>").await;
    mount_page(&server, "/two", "<html><body>hello world</body></html>").await;

    let outcome = worker(crawl_config(10))
        .crawl(&format!("{}/", server.uri()), None)
        .await;

    let copies: Vec<_> = outcome
        .pages
        .iter()
        .filter(|page| page.url.ends_with("/one") || page.url.ends_with("/two"))
        .collect();
    assert_eq!(copies.len(), 2);
    assert_eq!(copies.iter().filter(|page| page.is_duplicate).count(), 1);
    assert_eq!(outcome.progress.duplicates, 1);
}

#[tokio::test]
async fn test_resume_never_refetches_visited_pages() {
    let server = four_page_site().await;
    let start = format!("{}/", server.uri());

    let first = worker(crawl_config(2)).crawl(&start, None).await;
    assert_eq!(first.stop_reason, StopReason::MaxPages);
    assert_eq!(first.checkpoint.pages_visited.len(), 2);

    let second = worker(crawl_config(10))
        .crawl(&start, Some(&first.checkpoint))
        .await;
    assert_eq!(second.stop_reason, StopReason::Completed);

    for route in ["/", "/about", "/team", "/blog/post1"] {
        assert_eq!(hits(&server, route).await, 1, "{} fetched more than once", route);
    }
    assert_eq!(second.checkpoint.pages_visited.len(), 4);
}
