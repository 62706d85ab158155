//! Checkpoint validation and repair
//!
//! Stored checkpoints are read as untyped JSON and coerced field by field into
//! a `Checkpoint`. A missing field, or one holding the wrong JSON type, is
//! replaced with an empty default; it is never merged. Older format versions
//! are migrated on the way through.

use crate::checkpoint::types::{Checkpoint, ProgressCounters, CHECKPOINT_VERSION};
use crate::crawler::{PageType, QueuedUrl};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Parses stored checkpoint text, degrading to an empty checkpoint if it is not JSON
pub fn parse_checkpoint(raw: &str) -> Checkpoint {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => validate_and_repair(&value),
        Err(e) => {
            warn!("Checkpoint is not valid JSON, starting from defaults: {}", e);
            Checkpoint::new()
        }
    }
}

/// Coerces an untyped checkpoint into the current format
pub fn validate_and_repair(raw: &Value) -> Checkpoint {
    let Some(obj) = raw.as_object() else {
        warn!("Checkpoint is not an object, starting from defaults");
        return Checkpoint::new();
    };

    let version = obj
        .get("version")
        .and_then(Value::as_u64)
        .map(clamp_u32)
        .unwrap_or(1);

    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let pages_visited = string_list(obj, "pagesVisited");
    let mut pages_queued = string_list(obj, "pagesQueued");
    let content_hashes = string_list(obj, "contentHashes");
    let mut seen_urls = string_list(obj, "seenUrls");
    let current_depth = u32_field(obj, "currentDepth");
    let mut frontier = frontier_entries(obj);

    // v1 only kept queued URLs; rebuild entries at the recorded depth
    if frontier.is_empty() && !pages_queued.is_empty() {
        debug!("Migrating checkpoint v{} queued URLs into frontier entries", version);
        frontier = pages_queued
            .iter()
            .enumerate()
            .map(|(i, url)| QueuedUrl {
                url: url.clone(),
                depth: current_depth,
                page_type: PageType::Generic,
                sequence: i as u64,
            })
            .collect();
    }

    if pages_queued.is_empty() && !frontier.is_empty() {
        pages_queued = frontier.iter().map(|q| q.url.clone()).collect();
    }

    if seen_urls.is_empty() {
        let seen: BTreeSet<String> = pages_visited
            .iter()
            .chain(pages_queued.iter())
            .cloned()
            .collect();
        seen_urls = seen.into_iter().collect();
    }

    Checkpoint {
        version: CHECKPOINT_VERSION,
        timestamp,
        pages_visited,
        pages_queued,
        content_hashes,
        seen_urls,
        frontier,
        progress: progress_counters(obj),
        external_links: string_list(obj, "externalLinks"),
        current_depth,
        entities_extracted_count: obj
            .get("entitiesExtractedCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        analysis_sections_completed: string_list(obj, "analysisSectionsCompleted"),
    }
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn u32_field(obj: &Map<String, Value>, key: &str) -> u32 {
    obj.get(key)
        .and_then(Value::as_u64)
        .map(clamp_u32)
        .unwrap_or(0)
}

/// A list of strings; any other shape becomes empty, and non-string items are dropped
fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!("Checkpoint field {} has wrong type ({}), replacing", key, type_name(other));
            Vec::new()
        }
    }
}

fn frontier_entries(obj: &Map<String, Value>) -> Vec<QueuedUrl> {
    match obj.get("frontier") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<QueuedUrl>(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn progress_counters(obj: &Map<String, Value>) -> ProgressCounters {
    let Some(progress) = obj.get("progress").and_then(Value::as_object) else {
        return ProgressCounters::default();
    };
    ProgressCounters {
        pages_crawled: u32_field(progress, "pagesCrawled"),
        pages_skipped: u32_field(progress, "pagesSkipped"),
        duplicates: u32_field(progress, "duplicates"),
        errors_count: u32_field(progress, "errorsCount"),
        external_links: u32_field(progress, "externalLinks"),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
