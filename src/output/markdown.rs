//! Markdown summary generation
//!
//! This module generates human-readable markdown summaries of a single crawl
//! session, including counters, page type and depth breakdowns, and failures.

use crate::crawler::{CrawlOutcome, PageType};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a markdown summary of a crawl session to a file
///
/// # Arguments
///
/// * `start_url` - The URL the session started from
/// * `outcome` - The finished session
/// * `output_path` - Path where the markdown file should be written
pub fn write_crawl_summary(
    start_url: &str,
    outcome: &CrawlOutcome,
    output_path: &Path,
) -> std::io::Result<()> {
    let markdown = format_crawl_summary(start_url, outcome);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a crawl session as markdown
pub fn format_crawl_summary(start_url: &str, outcome: &CrawlOutcome) -> String {
    let progress = &outcome.progress;
    let mut md = String::new();

    md.push_str(&format!("# Crawl Summary: {}\n\n", start_url));

    md.push_str("## Session\n\n");
    md.push_str(&format!("- **Stop Reason**: {}\n", outcome.stop_reason));
    md.push_str(&format!(
        "- **Started**: {}\n",
        progress.started_at.to_rfc3339()
    ));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds\n",
        progress.elapsed_secs
    ));
    md.push_str(&format!(
        "- **Resumable**: {}\n\n",
        if outcome.checkpoint.is_resumable() { "yes" } else { "no" }
    ));

    md.push_str("## Counters\n\n");
    md.push_str("| Counter | Value |\n");
    md.push_str("|---------|-------|\n");
    md.push_str(&format!("| Pages crawled | {} |\n", progress.pages_crawled));
    md.push_str(&format!("| Pages still queued | {} |\n", progress.pages_queued));
    md.push_str(&format!("| Pages skipped | {} |\n", progress.pages_skipped));
    md.push_str(&format!("| Duplicates | {} |\n", progress.duplicates));
    md.push_str(&format!("| Errors | {} |\n", progress.errors_count));
    md.push_str(&format!(
        "| External links | {} |\n\n",
        progress.external_links
    ));

    let mut by_type: HashMap<PageType, u32> = HashMap::new();
    let mut by_depth: BTreeMap<u32, u32> = BTreeMap::new();
    for page in outcome.pages.iter().filter(|page| page.is_success()) {
        *by_type.entry(page.page_type).or_insert(0) += 1;
        *by_depth.entry(page.depth).or_insert(0) += 1;
    }

    if !by_type.is_empty() {
        md.push_str("## Page Types\n\n");
        md.push_str("| Type | Pages |\n");
        md.push_str("|------|-------|\n");

        let mut types: Vec<_> = by_type.into_iter().collect();
        types.sort_by_key(|(page_type, _)| (page_type.priority(), page_type.to_db_string()));
        for (page_type, count) in types {
            md.push_str(&format!("| {} | {} |\n", page_type, count));
        }
        md.push('\n');
    }

    if !by_depth.is_empty() {
        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages |\n");
        md.push_str("|-------|-------|\n");
        for (depth, count) in by_depth {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    let failures: Vec<_> = outcome
        .pages
        .iter()
        .filter_map(|page| page.error.as_ref().map(|error| (&page.url, error)))
        .collect();
    if !failures.is_empty() {
        md.push_str("## Failed Pages\n\n");
        md.push_str("| URL | Error |\n");
        md.push_str("|-----|-------|\n");
        for (url, error) in failures.iter().take(20) {
            md.push_str(&format!("| {} | {} |\n", url, error));
        }
        if failures.len() > 20 {
            md.push_str(&format!("\n... and {} more\n", failures.len() - 20));
        }
        md.push('\n');
    }

    if !outcome.checkpoint.external_links.is_empty() {
        md.push_str("## External Links\n\n");
        for link in &outcome.checkpoint.external_links {
            md.push_str(&format!("- {}\n", link));
        }
        md.push('\n');
    }

    md
}
