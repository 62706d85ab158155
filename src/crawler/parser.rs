//! HTML extraction helpers
//!
//! Pulls the pieces of a page the crawl loop needs out of raw HTML:
//! - Page title (`<title>`, falling back to the first `<h1>`)
//! - Visible text with scripts and styles removed
//! - Followable links (`<a href>` and canonical links)

use scraper::{Html, Selector};
use url::Url;

/// What the crawl loop keeps from an HTML document
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// The page title
    pub title: Option<String>,

    /// Visible text, whitespace-collapsed
    pub text: String,

    /// Absolute http(s) links found on the page
    pub links: Vec<String>,
}

/// Parses HTML content and extracts title, text and links
///
/// # Link Extraction Rules
///
/// **Include:** `<a href="...">` anywhere in the document and `<link rel="canonical">`.
///
/// **Exclude:** anchors with a `download` attribute, `javascript:`, `mailto:`,
/// `tel:` and `data:` hrefs, fragment-only hrefs, and anything that does not
/// resolve to http(s).
///
/// # Example
///
/// ```
/// use company_intel::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Acme</title></head><body><a href="/team">Team</a></body></html>"#;
/// let base_url = Url::parse("https://acme.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Acme".to_string()));
/// assert_eq!(parsed.links, vec!["https://acme.com/team".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        text: extract_text(&document),
        links: extract_links(&document, base_url),
    }
}

/// Extracts only the links from an HTML string
pub fn extract_links_from_html(html: &str, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    extract_links(&document, base_url)
}

/// Collapses runs of whitespace into single spaces and trims the ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_title(document: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        let title = document
            .select(&selector)
            .next()
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .filter(|s| !s.is_empty());
        if title.is_some() {
            return title;
        }
    }
    None
}

fn extract_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node
            .parent()
            .and_then(|parent| {
                parent.value().as_element().map(|e| {
                    matches!(
                        e.name(),
                        "script" | "style" | "noscript" | "title" | "template"
                    )
                })
            })
            .unwrap_or(false);
        if hidden {
            continue;
        }

        let text: &str = text;
        if !text.trim().is_empty() {
            parts.push(text);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(link) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(link);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(link) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(link);
            }
        }
    }

    links
}

/// Resolves an href against the base URL, dropping non-navigational links
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}
