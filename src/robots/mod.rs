//! Robots.txt handling module
//!
//! This module matches paths against robots.txt with the robotstxt crate,
//! reads the crawl delay for this crawler, and caches the result per domain.
//! Concurrent lookups for one domain share a single fetch.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::RobotsDirectives;
