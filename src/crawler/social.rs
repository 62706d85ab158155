//! Social network link detection

use crate::config::SocialFollow;
use crate::crawler::parser::extract_links_from_html;
use crate::url::matches_wildcard;
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// Social networks the crawler knows how to recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocialPlatform {
    LinkedIn,
    Twitter,
    Facebook,
    Instagram,
    YouTube,
    GitHub,
}

impl SocialPlatform {
    /// Every supported platform
    pub fn all() -> &'static [SocialPlatform] {
        &[
            SocialPlatform::LinkedIn,
            SocialPlatform::Twitter,
            SocialPlatform::Facebook,
            SocialPlatform::Instagram,
            SocialPlatform::YouTube,
            SocialPlatform::GitHub,
        ]
    }

    /// Host patterns identifying this platform
    pub fn host_patterns(&self) -> &'static [&'static str] {
        match self {
            SocialPlatform::LinkedIn => &["*.linkedin.com", "lnkd.in"],
            SocialPlatform::Twitter => &["*.twitter.com", "*.x.com"],
            SocialPlatform::Facebook => &["*.facebook.com", "fb.com"],
            SocialPlatform::Instagram => &["*.instagram.com"],
            SocialPlatform::YouTube => &["*.youtube.com", "youtu.be"],
            SocialPlatform::GitHub => &["github.com", "www.github.com"],
        }
    }

    /// Identifies the platform a host belongs to
    pub fn from_host(host: &str) -> Option<Self> {
        Self::all().iter().copied().find(|platform| {
            platform
                .host_patterns()
                .iter()
                .any(|pattern| matches_wildcard(pattern, host))
        })
    }

    /// Whether the session's follow flags allow crawling this platform
    pub fn is_followed(&self, follow: &SocialFollow) -> bool {
        match self {
            SocialPlatform::LinkedIn => follow.linkedin,
            SocialPlatform::Twitter => follow.twitter,
            SocialPlatform::Facebook => follow.facebook,
            SocialPlatform::Instagram => follow.instagram,
            SocialPlatform::YouTube => follow.youtube,
            SocialPlatform::GitHub => follow.github,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::LinkedIn => "linkedin",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::YouTube => "youtube",
            SocialPlatform::GitHub => "github",
        }
    }
}

impl fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An external link to a company's social profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialLink {
    pub url: String,
    pub platform: SocialPlatform,
}

/// Finds social network links in page HTML
pub trait SocialLinkDetector: Send + Sync {
    fn detect(&self, html: &str, base_url: &Url) -> Vec<SocialLink>;
}

/// Detector that recognizes platforms by link host
#[derive(Debug, Clone, Default)]
pub struct HostSocialDetector;

impl HostSocialDetector {
    pub fn new() -> Self {
        Self
    }
}

impl SocialLinkDetector for HostSocialDetector {
    fn detect(&self, html: &str, base_url: &Url) -> Vec<SocialLink> {
        let mut seen = HashSet::new();

        extract_links_from_html(html, base_url)
            .into_iter()
            .filter_map(|link| {
                let host = Url::parse(&link).ok()?.host_str()?.to_lowercase();
                let platform = SocialPlatform::from_host(&host)?;
                Some(SocialLink {
                    url: link,
                    platform,
                })
            })
            .filter(|social| seen.insert(social.url.clone()))
            .collect()
    }
}
