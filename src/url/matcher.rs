/// Checks if a host matches a wildcard host pattern
///
/// This function supports two types of patterns:
/// 1. Exact match: "github.com" matches only "github.com"
/// 2. Wildcard match: "*.linkedin.com" matches:
///    - "linkedin.com" (the bare domain)
///    - "www.linkedin.com" (single subdomain)
///    - "uk.m.linkedin.com" (nested subdomains)
///
/// # Examples
///
/// ```
/// use company_intel::url::matches_wildcard;
///
/// assert!(matches_wildcard("github.com", "github.com"));
/// assert!(!matches_wildcard("github.com", "gist.github.com"));
///
/// assert!(matches_wildcard("*.linkedin.com", "linkedin.com"));
/// assert!(matches_wildcard("*.linkedin.com", "www.linkedin.com"));
/// assert!(!matches_wildcard("*.linkedin.com", "notlinkedin.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    let candidate = candidate.to_lowercase();
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}
