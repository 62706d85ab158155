//! Page classification
//!
//! Page types drive frontier priority: pages with durable business value
//! (about, team, leadership) are crawled before contact/product pages, which
//! come before generic pages, with blog and news last.

use crate::crawler::parser::extract_links_from_html;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Classification of a crawled page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    About,
    Team,
    Leadership,
    Contact,
    Product,
    Pricing,
    Services,
    Generic,
    Document,
    Blog,
    News,
}

impl PageType {
    /// Frontier priority class; lower is crawled first
    pub fn priority(&self) -> u8 {
        match self {
            PageType::About | PageType::Team | PageType::Leadership => 0,
            PageType::Contact | PageType::Product | PageType::Pricing | PageType::Services => 1,
            PageType::Generic | PageType::Document => 2,
            PageType::Blog | PageType::News => 3,
        }
    }

    /// Converts the page type to its stored string form
    pub fn to_db_string(&self) -> &'static str {
        match self {
            PageType::About => "about",
            PageType::Team => "team",
            PageType::Leadership => "leadership",
            PageType::Contact => "contact",
            PageType::Product => "product",
            PageType::Pricing => "pricing",
            PageType::Services => "services",
            PageType::Generic => "generic",
            PageType::Document => "document",
            PageType::Blog => "blog",
            PageType::News => "news",
        }
    }

    /// Parses a stored page type, falling back to `Generic`
    pub fn from_db_string(s: &str) -> Self {
        match s {
            "about" => PageType::About,
            "team" => PageType::Team,
            "leadership" => PageType::Leadership,
            "contact" => PageType::Contact,
            "product" => PageType::Product,
            "pricing" => PageType::Pricing,
            "services" => PageType::Services,
            "document" => PageType::Document,
            "blog" => PageType::Blog,
            "news" => PageType::News,
            _ => PageType::Generic,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Classifies URLs and pulls links out of page HTML
pub trait ContentClassifier: Send + Sync {
    /// Classifies a URL into a page type
    fn classify(&self, url: &str) -> PageType;

    /// Extracts absolute links from HTML
    fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String>;
}

/// Path keyword classifier
///
/// Splits the URL path into words (on `/`, `-`, `_` and `.`) and matches them
/// against keyword lists. Blog/news sections are checked first so a post
/// titled "meet the team" under `/blog` stays a blog page.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

const KEYWORDS: &[(PageType, &[&str])] = &[
    (PageType::Blog, &["blog", "blogs", "articles", "posts", "insights"]),
    (PageType::News, &["news", "press", "newsroom", "media", "events"]),
    (
        PageType::Leadership,
        &["leadership", "management", "founders", "executives", "board", "leaders"],
    ),
    (PageType::Team, &["team", "people", "staff", "employees"]),
    (
        PageType::About,
        &["about", "company", "story", "mission", "history", "values"],
    ),
    (PageType::Contact, &["contact", "locations", "offices", "support"]),
    (PageType::Pricing, &["pricing", "plans", "price", "prices"]),
    (
        PageType::Product,
        &["product", "products", "platform", "features", "solutions"],
    ),
    (PageType::Services, &["services", "service", "consulting"]),
];

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ContentClassifier for KeywordClassifier {
    fn classify(&self, url: &str) -> PageType {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_lowercase(),
            Err(_) => url.to_lowercase(),
        };

        if path.ends_with(".pdf") {
            return PageType::Document;
        }

        let words: Vec<&str> = path
            .split(|c: char| matches!(c, '/' | '-' | '_' | '.'))
            .filter(|w| !w.is_empty())
            .collect();

        KEYWORDS
            .iter()
            .find(|(_, keywords)| words.iter().any(|w| keywords.contains(w)))
            .map(|(page_type, _)| *page_type)
            .unwrap_or(PageType::Generic)
    }

    fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String> {
        extract_links_from_html(html, base_url)
    }
}
