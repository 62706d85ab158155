//! Statistics over stored jobs and batches
//!
//! This module provides functionality for extracting and displaying
//! job and batch statistics from the storage layer.

use crate::state::JobStatus;
use crate::storage::{BatchRecord, Storage, StorageResult};
use std::collections::HashMap;

/// Job and batch statistics summary
#[derive(Debug, Clone, Default)]
pub struct IntelStatistics {
    /// Total number of jobs
    pub total_jobs: u64,

    /// Count of jobs by status
    pub jobs_by_status: HashMap<JobStatus, u64>,

    /// Pages crawled across all jobs
    pub pages_crawled: u64,

    /// Entities extracted across all jobs
    pub entities_extracted: u64,

    /// LLM tokens used across all jobs
    pub tokens_used: u64,

    /// LLM cost across all jobs
    pub cost_usd: f64,

    /// Failure reasons and how many jobs failed with each
    pub failure_reasons: HashMap<String, u64>,

    /// All batches, in scheduling order
    pub batches: Vec<BatchRecord>,
}

impl IntelStatistics {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Completed jobs as a share of finished jobs
    pub fn success_rate(&self) -> f64 {
        let finished = self.count(JobStatus::Completed) + self.count(JobStatus::Failed);
        if finished == 0 {
            return 0.0;
        }
        self.count(JobStatus::Completed) as f64 / finished as f64 * 100.0
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
pub fn load_statistics<S: Storage + ?Sized>(storage: &S) -> StorageResult<IntelStatistics> {
    let mut stats = IntelStatistics {
        jobs_by_status: storage.count_jobs_by_status()?,
        batches: storage.list_batches()?,
        ..Default::default()
    };
    stats.total_jobs = stats.jobs_by_status.values().sum();

    for status in JobStatus::all_states() {
        for job in storage.list_jobs_by_status(status)? {
            stats.pages_crawled += u64::from(job.pages_crawled);
            stats.entities_extracted += job.entities_extracted;
            stats.tokens_used += job.tokens_used;
            stats.cost_usd += job.cost_usd;
            if let Some(reason) = job.failure_reason {
                *stats.failure_reasons.entry(reason).or_insert(0) += 1;
            }
        }
    }

    Ok(stats)
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &IntelStatistics) {
    println!("=== Company Intel Statistics ===\n");

    println!("Overview:");
    println!("  Total jobs: {}", stats.total_jobs);
    println!("  Pages crawled: {}", stats.pages_crawled);
    println!("  Entities extracted: {}", stats.entities_extracted);
    println!("  Tokens used: {} (${:.4})", stats.tokens_used, stats.cost_usd);
    println!();

    println!("Jobs by Status:");
    let mut status_counts: Vec<_> = stats.jobs_by_status.iter().collect();
    status_counts.sort_by(|a, b| b.1.cmp(a.1));

    for (status, count) in status_counts {
        let percentage = if stats.total_jobs > 0 {
            (*count as f64 / stats.total_jobs as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.failure_reasons.is_empty() {
        println!("Failure Reasons:");
        let mut reasons: Vec<_> = stats.failure_reasons.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (reason, count) in reasons {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    if !stats.batches.is_empty() {
        println!("Batches ({}):", stats.batches.len());
        for batch in &stats.batches {
            println!(
                "  - {} [{}] {} priority {}: {}/{} finished ({:.1}%), {} failed",
                batch.name,
                batch.id,
                batch.status,
                batch.priority,
                batch.counts.finished(),
                batch.counts.total,
                batch.counts.percent_complete(),
                batch.counts.failed
            );
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} completed, {} failed)",
        stats.success_rate(),
        stats.count(JobStatus::Completed),
        stats.count(JobStatus::Failed)
    );
}
