//! Output module for crawl summaries and job statistics
//!
//! This module handles:
//! - Generating markdown summaries of a crawl session
//! - Loading and printing job and batch statistics

mod markdown;
pub mod stats;

pub use markdown::{format_crawl_summary, write_crawl_summary};
pub use stats::{load_statistics, print_statistics, IntelStatistics};
