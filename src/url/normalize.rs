use crate::UrlError;
use url::Url;

/// Normalizes a URL for frontier deduplication
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject schemes other than http/https
/// 3. Lowercase scheme and host (the parser does this for http/https)
/// 4. Strip the default port (the parser drops `:80` / `:443`)
/// 5. Normalize path:
///    - Remove dot segments (. and ..) and empty segments
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 6. Remove fragment (everything after #)
/// 7. Keep the query string as-is; only an empty trailing `?` is dropped
///
/// # Examples
///
/// ```
/// use company_intel::url::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM:443/team/#leadership").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/team");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or(UrlError::MissingDomain)?
        .to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

/// Resolves a possibly-relative link against a base URL and normalizes it
///
/// Returns None for links that cannot become crawlable http(s) URLs.
pub fn normalize_link(href: &str, base: &Url) -> Option<Url> {
    let joined = base.join(href.trim()).ok()?;
    normalize_url(joined.as_str()).ok()
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_scheme_and_host() {
        let result = normalize_url("HTTPS://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_keeps_http_scheme() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_strips_default_port() {
        let result = normalize_url("https://example.com:443/about").unwrap();
        assert_eq!(result.as_str(), "https://example.com/about");

        let result = normalize_url("http://example.com:80/about").unwrap();
        assert_eq!(result.as_str(), "http://example.com/about");
    }

    #[test]
    fn test_keeps_non_default_port() {
        let result = normalize_url("http://127.0.0.1:8080/about/").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/about");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize_url("https://example.com/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_keep_root_slash() {
        let result = normalize_url("https://example.com/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_query_string_is_kept() {
        let result = normalize_url("https://example.com/products?id=7&b=2").unwrap();
        assert_eq!(result.as_str(), "https://example.com/products?id=7&b=2");
    }

    #[test]
    fn test_empty_query_removed() {
        let result = normalize_url("https://example.com/products?").unwrap();
        assert_eq!(result.as_str(), "https://example.com/products");
    }

    #[test]
    fn test_normalize_path_with_dots() {
        let result = normalize_url("https://example.com/a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://example.com/b/c");
    }

    #[test]
    fn test_multiple_slashes() {
        let result = normalize_url("https://example.com///path//to///page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/path/to/page");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/page");
        assert!(matches!(result, Err(UrlError::InvalidScheme(_))));
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_normalize_relative_link() {
        let base = Url::parse("https://example.com/company/").unwrap();
        let link = normalize_link("../team/#founders", &base).unwrap();
        assert_eq!(link.as_str(), "https://example.com/team");

        assert!(normalize_link("mailto:hello@example.com", &base).is_none());
    }
}
