//! URL handling module for Company-Intel
//!
//! This module provides URL normalization, domain extraction and
//! wildcard host matching used by the frontier and social link detection.

mod domain;
mod matcher;
mod normalize;

pub use domain::{domain_of, extract_domain, same_site, site_key};
pub use matcher::matches_wildcard;
pub use normalize::{normalize_link, normalize_url};

/// Returns true if the URL looks like a PDF document
///
/// The check is a case-insensitive `.pdf` suffix on the path, so query strings
/// such as `report.pdf?download=1` still count.
pub fn is_pdf_url(url: &str) -> bool {
    match ::url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase().ends_with(".pdf"),
        Err(_) => url.to_lowercase().ends_with(".pdf"),
    }
}
