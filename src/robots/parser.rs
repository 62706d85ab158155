//! Robots.txt parser implementation
//!
//! Allow/Disallow decisions are made by the robotstxt crate's matcher
//! (Google's rules: the group naming this crawler replaces the `*` group,
//! the longest matching pattern wins and Allow wins a tie). `Crawl-delay` is
//! not covered by the matcher and is read here.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// The crawl policy that applies to this crawler on one site
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsDirectives {
    /// Raw robots.txt content
    content: String,
    /// Lowercased product token of this crawler's user agent
    product: String,
    crawl_delay: Option<f64>,
    found: bool,
}

/// One `User-agent` group, as far as `Crawl-delay` is concerned
#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsDirectives {
    /// Creates a permissive policy for a site without a usable robots.txt
    ///
    /// `found()` is false so callers can tell "no robots.txt" apart from
    /// "robots.txt that allows everything".
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses robots.txt content for the given user agent
    ///
    /// The agent is reduced to its product token (`"FooBot/1.2 (+url)"`
    /// matches `User-agent: foobot`).
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let product = product_token(user_agent);
        let crawl_delay = select_crawl_delay(&parse_groups(content), &product);

        Self {
            content: content.to_string(),
            product,
            crawl_delay,
            found: true,
        }
    }

    /// Whether a robots.txt was actually present for the site
    pub fn found(&self) -> bool {
        self.found
    }

    /// The `Crawl-delay` of the selected group, if any
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay.map(Duration::from_secs_f64)
    }

    /// Checks if a path (with optional query) may be crawled
    ///
    /// `/robots.txt` itself is always allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        if path == "/robots.txt" || self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.product, path)
    }
}

/// Splits robots.txt content into user-agent groups
fn parse_groups(content: &str) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut current = Group::default();
    // A user-agent line after rule lines starts a new group
    let mut seen_directive = false;

    for line in content.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if seen_directive {
                    groups.push(std::mem::take(&mut current));
                    seen_directive = false;
                }
                current.agents.push(product_token(value));
            }
            "allow" | "disallow" => seen_directive = true,
            "crawl-delay" => {
                seen_directive = true;
                if current.agents.is_empty() {
                    continue;
                }
                if let Ok(delay) = value.parse::<f64>() {
                    if delay.is_finite() && delay >= 0.0 {
                        current.crawl_delay = Some(delay);
                    }
                }
            }
            _ => {}
        }
    }

    if !current.agents.is_empty() {
        groups.push(current);
    }

    groups
}

/// Crawl delay of the groups naming `product`, falling back to the `*` groups
fn select_crawl_delay(groups: &[Group], product: &str) -> Option<f64> {
    let named = |name: &str| {
        groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a == name))
            .collect::<Vec<_>>()
    };

    let specific = named(product);
    let chosen = if specific.is_empty() || product == "*" {
        named("*")
    } else {
        specific
    };
    chosen.iter().find_map(|g| g.crawl_delay)
}

/// Lowercased product token of a user agent (`"FooBot/1.2 (+url)"` -> `"foobot"`)
fn product_token(user_agent: &str) -> String {
    user_agent
        .trim()
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_lowercase()
}
