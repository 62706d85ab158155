//! Page fetching
//!
//! This module defines the fetch collaborators the crawl loop talks to:
//! - `Fetcher` for ordinary pages (and robots.txt)
//! - `DocumentExtractor` for PDF documents
//! - `HttpFetcher`, the reqwest-backed default
//!
//! Fetch failures are data, not errors: a transport failure or a 4xx/5xx
//! response comes back as a `FetchResponse` with `error` set.

use crate::config::UserAgentConfig;
use crate::crawler::parser::{collapse_whitespace, parse_html};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use url::Url;

/// Result of fetching one URL
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub final_url: String,

    /// HTTP status code (0 when no response was received)
    pub status_code: u16,

    /// Content-Type header value, if any
    pub content_type: Option<String>,

    /// Raw response body
    pub body: String,

    /// Extracted visible text
    pub text: String,

    /// Page title, if one could be extracted
    pub title: Option<String>,

    /// Page-level error description
    pub error: Option<String>,
}

impl FetchResponse {
    /// Builds a failed response for a URL that never produced a usable body
    pub fn failed(url: &str, status_code: u16, error: impl Into<String>) -> Self {
        Self {
            final_url: url.to_string(),
            status_code,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Returns true if the fetch produced a usable page
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.status_code)
    }

    /// Returns true if the body looks like HTML
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => ct.to_lowercase().contains("html"),
            None => self.body.trim_start().starts_with('<'),
        }
    }
}

/// Fetches pages over the network
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches a URL; failures are reported through `FetchResponse::error`
    async fn fetch(&self, url: &str) -> FetchResponse;
}

/// Turns a document URL (PDF) into text
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Downloads and extracts the document; failures are reported through `error`
    async fn extract(&self, url: &str) -> FetchResponse;
}

/// Builds an HTTP client with proper configuration
///
/// The user agent is formatted as `CrawlerName/Version (+ContactURL; ContactEmail)`.
///
/// # Example
///
/// ```no_run
/// use company_intel::config::UserAgentConfig;
/// use company_intel::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "CompanyIntelBot".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/bot".to_string(),
///     contact_email: "bot@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, std::time::Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Default `Fetcher` backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with a 30 second request timeout
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, Duration::from_secs(30))?,
        })
    }

    /// Wraps an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResponse {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    "Request timeout".to_string()
                } else if e.is_connect() {
                    "Connection refused".to_string()
                } else if e.is_redirect() {
                    "Too many redirects".to_string()
                } else {
                    e.to_string()
                };
                return FetchResponse::failed(url, 0, error);
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return FetchResponse::failed(&final_url, status.as_u16(), e.to_string()),
        };

        let mut fetched = FetchResponse {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
            ..Default::default()
        };

        if !(status.is_success() || status.is_redirection()) {
            fetched.error = Some(format!("HTTP {}", status.as_u16()));
            return fetched;
        }

        if fetched.is_html() {
            let base = Url::parse(&fetched.final_url).or_else(|_| Url::parse(url));
            if let Ok(base) = base {
                let parsed = parse_html(&fetched.body, &base);
                fetched.title = parsed.title;
                fetched.text = parsed.text;
            }
        } else {
            fetched.text = collapse_whitespace(&fetched.body);
        }

        fetched
    }
}
