//! Crawl frontier
//!
//! The frontier owns everything a crawl session knows about URLs:
//! - a priority queue of pending URLs (page-type class first, FIFO within a class)
//! - the `seen` set, so a normalized URL is queued at most once
//! - the `visited` set and the content-hash set used for duplicate detection
//!
//! All of it can be exported to and rebuilt from a `FrontierSnapshot`.

use crate::crawler::classifier::{ContentClassifier, PageType};
use crate::url::{normalize_url, site_key};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// A frontier entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedUrl {
    /// Normalized URL
    pub url: String,

    /// Link distance from the start URL
    pub depth: u32,

    /// Classification used for priority
    pub page_type: PageType,

    /// Insertion order, for FIFO within a priority class
    pub sequence: u64,
}

impl QueuedUrl {
    pub fn priority(&self) -> u8 {
        self.page_type.priority()
    }
}

/// Heap wrapper ordering entries so the best one pops first
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry(QueuedUrl);

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: lower priority value and lower sequence must compare greater
        other
            .0
            .priority()
            .cmp(&self.0.priority())
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Serializable frontier state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrontierSnapshot {
    pub visited: Vec<String>,
    pub seen: Vec<String>,
    pub content_hashes: Vec<String>,
    /// Remaining entries in pop order
    pub queued: Vec<QueuedUrl>,
}

/// Priority-ordered, deduplicating crawl queue for one site
pub struct PriorityFrontier {
    base_site: String,
    max_depth: u32,
    classifier: Arc<dyn ContentClassifier>,
    heap: BinaryHeap<HeapEntry>,
    seen: HashSet<String>,
    visited: HashSet<String>,
    content_hashes: HashSet<String>,
    allowed_hosts: HashSet<String>,
    next_sequence: u64,
}

impl PriorityFrontier {
    /// Creates an empty frontier anchored at a base host
    ///
    /// # Arguments
    ///
    /// * `base_host` - Host of the start URL; `www.` is ignored when comparing
    /// * `max_depth` - URLs deeper than this are dropped
    /// * `classifier` - Assigns page types (and therefore priority) to URLs
    pub fn new(base_host: &str, max_depth: u32, classifier: Arc<dyn ContentClassifier>) -> Self {
        Self {
            base_site: site_key(base_host),
            max_depth,
            classifier,
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            visited: HashSet::new(),
            content_hashes: HashSet::new(),
            allowed_hosts: HashSet::new(),
            next_sequence: 0,
        }
    }

    /// Whitelists an external host (a followed social network)
    pub fn allow_host(&mut self, host: &str) {
        self.allowed_hosts.insert(host.to_lowercase());
    }

    /// Returns true if the host is the base site
    pub fn is_base_host(&self, host: &str) -> bool {
        site_key(host) == self.base_site
    }

    fn host_admitted(&self, host: &str) -> bool {
        self.is_base_host(host) || self.allowed_hosts.contains(&host.to_lowercase())
    }

    /// Adds a URL at the given depth
    ///
    /// # Returns
    ///
    /// * `true` - The URL was queued
    /// * `false` - Dropped: too deep, unparseable, cross-domain, or already seen
    pub fn add_url(&mut self, url: &str, depth: u32) -> bool {
        if depth > self.max_depth {
            trace!("Dropping {} at depth {} (max {})", url, depth, self.max_depth);
            return false;
        }

        let Ok(normalized) = normalize_url(url) else {
            return false;
        };
        let Some(host) = normalized.host_str() else {
            return false;
        };
        if !self.host_admitted(host) {
            return false;
        }

        let key = normalized.to_string();
        if self.seen.contains(&key) || self.visited.contains(&key) {
            return false;
        }

        let page_type = self.classifier.classify(&key);
        self.seen.insert(key.clone());
        self.push(QueuedUrl {
            url: key,
            depth,
            page_type,
            sequence: self.next_sequence,
        });
        true
    }

    fn push(&mut self, entry: QueuedUrl) {
        self.next_sequence = self.next_sequence.max(entry.sequence + 1);
        self.heap.push(HeapEntry(entry));
    }

    /// Removes and returns the highest-priority entry
    pub fn pop(&mut self) -> Option<QueuedUrl> {
        self.heap.pop().map(|entry| entry.0)
    }

    /// Records a URL as crawled
    pub fn mark_visited(&mut self, url: &str) {
        let key = normalize_url(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());
        self.seen.insert(key.clone());
        self.visited.insert(key);
    }

    pub fn is_visited(&self, url: &str) -> bool {
        match normalize_url(url) {
            Ok(normalized) => self.visited.contains(normalized.as_str()),
            Err(_) => self.visited.contains(url),
        }
    }

    /// Records a content hash
    ///
    /// # Returns
    ///
    /// * `true` - First time this hash was seen in the session
    /// * `false` - Duplicate content
    pub fn add_content_hash(&mut self, hash: &str) -> bool {
        self.content_hashes.insert(hash.to_string())
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Rebuilds state from a checkpoint
    ///
    /// Queued entries keep their original priority and insertion order. Entries
    /// already in the visited set are not re-queued.
    pub fn restore_state(
        &mut self,
        visited: impl IntoIterator<Item = String>,
        seen: impl IntoIterator<Item = String>,
        hashes: impl IntoIterator<Item = String>,
        queued: impl IntoIterator<Item = QueuedUrl>,
    ) {
        self.visited.extend(visited);
        self.seen.extend(seen);
        self.seen.extend(self.visited.iter().cloned());
        self.content_hashes.extend(hashes);

        for entry in queued {
            if self.visited.contains(&entry.url) || entry.depth > self.max_depth {
                continue;
            }
            self.seen.insert(entry.url.clone());
            self.push(entry);
        }
    }

    /// Exports the complete frontier state
    pub fn get_state(&self) -> FrontierSnapshot {
        let mut visited: Vec<String> = self.visited.iter().cloned().collect();
        let mut seen: Vec<String> = self.seen.iter().cloned().collect();
        let mut content_hashes: Vec<String> = self.content_hashes.iter().cloned().collect();
        visited.sort();
        seen.sort();
        content_hashes.sort();

        let mut entries: Vec<HeapEntry> = self.heap.iter().cloned().collect();
        // Descending heap order is pop order
        entries.sort_by(|a, b| b.cmp(a));

        FrontierSnapshot {
            visited,
            seen,
            content_hashes,
            queued: entries.into_iter().map(|entry| entry.0).collect(),
        }
    }
}

impl std::fmt::Debug for PriorityFrontier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityFrontier")
            .field("base_site", &self.base_site)
            .field("max_depth", &self.max_depth)
            .field("queued", &self.heap.len())
            .field("seen", &self.seen.len())
            .field("visited", &self.visited.len())
            .finish()
    }
}
