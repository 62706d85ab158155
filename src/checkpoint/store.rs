//! Durable per-job checkpoint persistence
//!
//! Each job owns exactly one checkpoint row; every save overwrites it.

use crate::checkpoint::repair::{parse_checkpoint, validate_and_repair};
use crate::checkpoint::types::{Checkpoint, CHECKPOINT_VERSION};
use crate::state::JobPhase;
use crate::storage::{lock, SharedStorage, Storage, StorageError, StorageResult};
use chrono::Utc;

/// Loads and saves job checkpoints through a storage backend
pub struct CheckpointStore<S: Storage> {
    storage: SharedStorage<S>,
}

impl<S: Storage> Clone for CheckpointStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<S: Storage> CheckpointStore<S> {
    pub fn new(storage: SharedStorage<S>) -> Self {
        Self { storage }
    }

    /// Persists a full checkpoint, stamping the current version and time
    pub fn save(&self, job_id: i64, checkpoint: &Checkpoint) -> StorageResult<()> {
        let mut checkpoint = checkpoint.clone();
        checkpoint.version = CHECKPOINT_VERSION;
        checkpoint.timestamp = Utc::now();

        let data = serde_json::to_string(&checkpoint)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        lock(&self.storage).save_checkpoint(job_id, &data)?;

        tracing::debug!(
            "Saved checkpoint for job {} ({} visited, {} queued)",
            job_id,
            checkpoint.pages_visited.len(),
            checkpoint.frontier.len()
        );
        Ok(())
    }

    /// Saves the summary fields of a checkpoint
    ///
    /// This is the entry point for the extraction and analysis phases, which
    /// only move the entity count and completed sections forward. The crawl
    /// loop saves whole checkpoints with `save`. Fields not given here (frontier entries, hashes, counters) are kept
    /// from the stored checkpoint when the queued URLs are unchanged.
    ///
    /// # Arguments
    ///
    /// * `job_id` - Owning job
    /// * `visited` - URLs already crawled
    /// * `queued` - URLs still waiting in the frontier
    /// * `external_links` - Social/external links discovered so far
    /// * `depth` - Current crawl depth
    /// * `entities` - Number of entities extracted
    /// * `sections` - Analysis sections already completed
    #[allow(clippy::too_many_arguments)]
    pub fn save_state(
        &self,
        job_id: i64,
        visited: Vec<String>,
        queued: Vec<String>,
        external_links: Vec<String>,
        depth: u32,
        entities: u64,
        sections: Vec<String>,
    ) -> StorageResult<()> {
        let mut checkpoint = self.load(job_id)?.unwrap_or_default();

        if checkpoint.pages_queued != queued {
            checkpoint.frontier.clear();
        }
        checkpoint.pages_visited = visited;
        checkpoint.pages_queued = queued;
        checkpoint.external_links = external_links;
        checkpoint.current_depth = depth;
        checkpoint.entities_extracted_count = entities;
        checkpoint.analysis_sections_completed = sections;

        // Round-trip through repair so a cleared frontier is rebuilt from the queue
        let value = serde_json::to_value(&checkpoint)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.save(job_id, &validate_and_repair(&value))
    }

    /// Loads a job's checkpoint, repairing it into the current format
    pub fn load(&self, job_id: i64) -> StorageResult<Option<Checkpoint>> {
        let raw = lock(&self.storage).load_checkpoint(job_id)?;
        Ok(raw.as_deref().map(parse_checkpoint))
    }

    /// Records the running entity count
    pub fn record_entities(&self, job_id: i64, count: u64) -> StorageResult<Checkpoint> {
        let checkpoint = self.load(job_id)?.unwrap_or_default();
        self.save_state(
            job_id,
            checkpoint.pages_visited,
            checkpoint.pages_queued,
            checkpoint.external_links,
            checkpoint.current_depth,
            count,
            checkpoint.analysis_sections_completed,
        )?;
        Ok(self.load(job_id)?.unwrap_or_default())
    }

    /// Records one finished analysis section (no-op if already recorded)
    pub fn mark_section_done(&self, job_id: i64, section: &str) -> StorageResult<Checkpoint> {
        let checkpoint = self.load(job_id)?.unwrap_or_default();
        if checkpoint.is_section_done(section) {
            return Ok(checkpoint);
        }

        let mut sections = checkpoint.analysis_sections_completed;
        sections.push(section.to_string());
        self.save_state(
            job_id,
            checkpoint.pages_visited,
            checkpoint.pages_queued,
            checkpoint.external_links,
            checkpoint.current_depth,
            checkpoint.entities_extracted_count,
            sections,
        )?;
        Ok(self.load(job_id)?.unwrap_or_default())
    }

    /// True if the stored checkpoint records any work
    pub fn can_resume(&self, job_id: i64) -> StorageResult<bool> {
        Ok(self
            .load(job_id)?
            .map(|c| c.is_resumable())
            .unwrap_or(false))
    }

    /// The phase to continue from, or `Crawling` with no checkpoint
    pub fn resume_phase(&self, job_id: i64) -> StorageResult<JobPhase> {
        Ok(self
            .load(job_id)?
            .map(|c| c.resume_phase())
            .unwrap_or(JobPhase::Crawling))
    }

    pub fn delete(&self, job_id: i64) -> StorageResult<()> {
        lock(&self.storage).delete_checkpoint(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{share, SqliteStorage};

    fn store_with_job() -> (CheckpointStore<SqliteStorage>, i64) {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let job_id = storage
            .insert_job("Acme", "https://acme.com", None)
            .unwrap();
        (CheckpointStore::new(share(storage)), job_id)
    }

    #[test]
    fn test_load_missing() {
        let (store, job_id) = store_with_job();
        assert!(store.load(job_id).unwrap().is_none());
        assert!(!store.can_resume(job_id).unwrap());
        assert_eq!(store.resume_phase(job_id).unwrap(), JobPhase::Crawling);
    }

    #[test]
    fn test_save_state_and_resume_phase() {
        let (store, job_id) = store_with_job();
        store
            .save_state(
                job_id,
                vec!["/".to_string(), "/about".to_string()],
                vec!["/team".to_string()],
                vec![],
                1,
                0,
                vec![],
            )
            .unwrap();

        let checkpoint = store.load(job_id).unwrap().unwrap();
        assert_eq!(checkpoint.version, CHECKPOINT_VERSION);
        assert_eq!(checkpoint.frontier.len(), 1);
        assert_eq!(checkpoint.frontier[0].depth, 1);
        assert!(store.can_resume(job_id).unwrap());
        assert_eq!(store.resume_phase(job_id).unwrap(), JobPhase::Extracting);
    }

    #[test]
    fn test_save_overwrites() {
        let (store, job_id) = store_with_job();
        let mut checkpoint = Checkpoint::new();
        checkpoint.pages_visited = vec!["/".to_string()];
        store.save(job_id, &checkpoint).unwrap();

        checkpoint.pages_visited.push("/about".to_string());
        store.save(job_id, &checkpoint).unwrap();

        assert_eq!(store.load(job_id).unwrap().unwrap().pages_visited.len(), 2);
    }

    #[test]
    fn test_entities_and_sections() {
        let (store, job_id) = store_with_job();
        store.record_entities(job_id, 7).unwrap();
        assert_eq!(store.resume_phase(job_id).unwrap(), JobPhase::Analyzing);

        store.mark_section_done(job_id, "overview").unwrap();
        let checkpoint = store.mark_section_done(job_id, "overview").unwrap();
        assert_eq!(checkpoint.analysis_sections_completed, vec!["overview"]);
        assert_eq!(checkpoint.entities_extracted_count, 7);
    }

    #[test]
    fn test_entities_keep_crawl_state() {
        let (store, job_id) = store_with_job();
        let mut checkpoint = Checkpoint::new();
        checkpoint.pages_visited = vec!["https://acme.com/".to_string()];
        checkpoint.pages_queued = vec!["https://acme.com/blog".to_string()];
        checkpoint.frontier = vec![crate::crawler::QueuedUrl {
            url: "https://acme.com/blog".to_string(),
            depth: 1,
            page_type: crate::crawler::PageType::Blog,
            sequence: 4,
        }];
        checkpoint.content_hashes = vec!["abc".to_string()];
        checkpoint.progress.pages_crawled = 1;
        store.save(job_id, &checkpoint).unwrap();

        let updated = store.record_entities(job_id, 3).unwrap();
        assert_eq!(updated.entities_extracted_count, 3);
        assert_eq!(updated.frontier, checkpoint.frontier);
        assert_eq!(updated.content_hashes, vec!["abc"]);
        assert_eq!(updated.progress.pages_crawled, 1);
    }

    #[test]
    fn test_corrupt_checkpoint_degrades() {
        let storage = share(SqliteStorage::new_in_memory().unwrap());
        let job_id = lock(&storage)
            .insert_job("Acme", "https://acme.com", None)
            .unwrap();
        lock(&storage)
            .save_checkpoint(job_id, "{\"pagesVisited\": 5")
            .unwrap();

        let store = CheckpointStore::new(storage);
        let checkpoint = store.load(job_id).unwrap().unwrap();
        assert!(checkpoint.pages_visited.is_empty());
        assert!(!store.can_resume(job_id).unwrap());
    }

    #[test]
    fn test_delete() {
        let (store, job_id) = store_with_job();
        store.record_entities(job_id, 1).unwrap();
        store.delete(job_id).unwrap();
        assert!(store.load(job_id).unwrap().is_none());
    }
}
