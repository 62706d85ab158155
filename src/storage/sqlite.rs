//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::crawler::{CrawledPage, PageType};
use crate::state::{BatchStatus, JobPhase, JobStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{format_timestamp, parse_timestamp, BatchCounts, BatchRecord, JobRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const JOB_COLUMNS: &str = "id, company_name, website, batch_id, status, phase, worker_id, \
     created_at, updated_at, started_at, paused_at, completed_at, paused_duration_ms, \
     failure_reason, pages_crawled, entities_extracted, tokens_used, cost_usd";

const BATCH_COLUMNS: &str = "id, name, status, priority, max_concurrent, created_at, started_at, \
     completed_at, total_jobs, pending_jobs, in_progress_jobs, paused_jobs, completed_jobs, \
     failed_jobs, tokens_used, cost_usd";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_jobs(&self, sql: &str, params: impl rusqlite::Params) -> StorageResult<Vec<JobRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| Ok(read_job_row(row)))?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row??);
        }
        Ok(jobs)
    }

    fn query_batches(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StorageResult<Vec<BatchRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| Ok(read_batch_row(row)))?;

        let mut batches = Vec::new();
        for row in rows {
            batches.push(row??);
        }
        Ok(batches)
    }
}

fn opt_timestamp(value: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn read_job_row(row: &Row<'_>) -> StorageResult<JobRecord> {
    let status: String = row.get(4)?;
    let phase: String = row.get(5)?;

    Ok(JobRecord {
        id: row.get(0)?,
        company_name: row.get(1)?,
        website: row.get(2)?,
        batch_id: row.get(3)?,
        status: JobStatus::from_db_string(&status)
            .ok_or_else(|| StorageError::Serialization(format!("unknown job status {}", status)))?,
        phase: JobPhase::from_db_string(&phase)
            .ok_or_else(|| StorageError::Serialization(format!("unknown job phase {}", phase)))?,
        worker_id: row.get(6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?)?,
        updated_at: parse_timestamp(&row.get::<_, String>(8)?)?,
        started_at: opt_timestamp(row.get(9)?)?,
        paused_at: opt_timestamp(row.get(10)?)?,
        completed_at: opt_timestamp(row.get(11)?)?,
        paused_duration_ms: row.get(12)?,
        failure_reason: row.get(13)?,
        pages_crawled: row.get(14)?,
        entities_extracted: row.get::<_, i64>(15)?.max(0) as u64,
        tokens_used: row.get::<_, i64>(16)?.max(0) as u64,
        cost_usd: row.get(17)?,
    })
}

fn read_batch_row(row: &Row<'_>) -> StorageResult<BatchRecord> {
    let status: String = row.get(2)?;

    Ok(BatchRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        status: BatchStatus::from_db_string(&status)
            .ok_or_else(|| StorageError::Serialization(format!("unknown batch status {}", status)))?,
        priority: row.get(3)?,
        max_concurrent: row.get(4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?)?,
        started_at: opt_timestamp(row.get(6)?)?,
        completed_at: opt_timestamp(row.get(7)?)?,
        counts: BatchCounts {
            total: row.get(8)?,
            pending: row.get(9)?,
            in_progress: row.get(10)?,
            paused: row.get(11)?,
            completed: row.get(12)?,
            failed: row.get(13)?,
        },
        tokens_used: row.get::<_, i64>(14)?.max(0) as u64,
        cost_usd: row.get(15)?,
    })
}

fn read_page_row(row: &Row<'_>) -> StorageResult<CrawledPage> {
    Ok(CrawledPage {
        url: row.get(0)?,
        final_url: row.get(1)?,
        depth: row.get(2)?,
        page_type: PageType::from_db_string(&row.get::<_, String>(3)?),
        status_code: row.get(4)?,
        title: row.get(5)?,
        text: row.get(6)?,
        content_hash: row.get(7)?,
        is_duplicate: row.get(8)?,
        error: row.get(9)?,
        crawled_at: parse_timestamp(&row.get::<_, String>(10)?)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Job Management =====

    fn insert_job(
        &mut self,
        company_name: &str,
        website: &str,
        batch_id: Option<&str>,
    ) -> StorageResult<i64> {
        let now = format_timestamp(&Utc::now());
        self.conn.execute(
            "INSERT INTO jobs (company_name, website, batch_id, status, phase, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                company_name,
                website,
                batch_id,
                JobStatus::Pending.to_db_string(),
                JobPhase::Queued.to_db_string(),
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_job(&self, job_id: i64) -> StorageResult<JobRecord> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        self.conn
            .query_row(&sql, params![job_id], |row| Ok(read_job_row(row)))
            .optional()?
            .ok_or(StorageError::JobNotFound(job_id))?
    }

    fn update_job(&mut self, job: &JobRecord) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET batch_id = ?2, status = ?3, phase = ?4, worker_id = ?5,
                 updated_at = ?6, started_at = ?7, paused_at = ?8, completed_at = ?9,
                 paused_duration_ms = ?10, failure_reason = ?11, pages_crawled = ?12,
                 entities_extracted = ?13, tokens_used = ?14, cost_usd = ?15
             WHERE id = ?1",
            params![
                job.id,
                job.batch_id,
                job.status.to_db_string(),
                job.phase.to_db_string(),
                job.worker_id,
                format_timestamp(&Utc::now()),
                job.started_at.as_ref().map(format_timestamp),
                job.paused_at.as_ref().map(format_timestamp),
                job.completed_at.as_ref().map(format_timestamp),
                job.paused_duration_ms,
                job.failure_reason,
                job.pages_crawled,
                job.entities_extracted as i64,
                job.tokens_used as i64,
                job.cost_usd,
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::JobNotFound(job.id));
        }
        Ok(())
    }

    fn transition_job(&mut self, job: &JobRecord, from: &[JobStatus]) -> StorageResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let allowed = from
            .iter()
            .map(|status| format!("'{}'", status.to_db_string()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "UPDATE jobs SET status = ?2, phase = ?3, worker_id = ?4, updated_at = ?5,
                 started_at = ?6, paused_at = ?7, completed_at = ?8,
                 paused_duration_ms = ?9, failure_reason = ?10
             WHERE id = ?1 AND status IN ({})",
            allowed
        );
        let changed = self.conn.execute(
            &sql,
            params![
                job.id,
                job.status.to_db_string(),
                job.phase.to_db_string(),
                job.worker_id,
                format_timestamp(&Utc::now()),
                job.started_at.as_ref().map(format_timestamp),
                job.paused_at.as_ref().map(format_timestamp),
                job.completed_at.as_ref().map(format_timestamp),
                job.paused_duration_ms,
                job.failure_reason,
            ],
        )?;
        Ok(changed == 1)
    }

    fn update_job_progress(
        &mut self,
        job_id: i64,
        pages_crawled: u32,
        entities_extracted: u64,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET pages_crawled = ?2, entities_extracted = ?3, updated_at = ?4
             WHERE id = ?1",
            params![
                job_id,
                pages_crawled,
                entities_extracted as i64,
                format_timestamp(&Utc::now())
            ],
        )?;
        Ok(())
    }

    fn add_job_usage(&mut self, job_id: i64, tokens: u64, cost_usd: f64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET tokens_used = tokens_used + ?2, cost_usd = cost_usd + ?3,
                 updated_at = ?4
             WHERE id = ?1",
            params![job_id, tokens as i64, cost_usd, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    fn list_jobs_by_status(&self, status: JobStatus) -> StorageResult<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at, id",
            JOB_COLUMNS
        );
        self.query_jobs(&sql, params![status.to_db_string()])
    }

    fn list_batch_jobs(&self, batch_id: &str) -> StorageResult<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE batch_id = ?1 ORDER BY created_at, id",
            JOB_COLUMNS
        );
        self.query_jobs(&sql, params![batch_id])
    }

    fn assign_jobs_to_batch(&mut self, job_ids: &[i64], batch_id: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE jobs SET batch_id = ?1 WHERE id = ?2")?;
            for job_id in job_ids {
                if stmt.execute(params![batch_id, job_id])? == 0 {
                    return Err(StorageError::JobNotFound(*job_id));
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn count_in_progress(&self, batch_id: Option<&str>) -> StorageResult<u32> {
        let count: u32 = match batch_id {
            Some(batch_id) => self.conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = 'in_progress' AND batch_id = ?1",
                params![batch_id],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = 'in_progress'",
                [],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    fn oldest_pending_job(&self, batch_id: &str) -> StorageResult<Option<JobRecord>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE batch_id = ?1 AND status = 'pending'
             ORDER BY created_at, id LIMIT 1",
            JOB_COLUMNS
        );
        Ok(self.query_jobs(&sql, params![batch_id])?.into_iter().next())
    }

    fn try_admit_job(
        &mut self,
        job_id: i64,
        worker_id: &str,
        global_cap: u32,
        batch_cap: u32,
    ) -> StorageResult<bool> {
        let now = format_timestamp(&Utc::now());
        let changed = self.conn.execute(
            "UPDATE jobs
             SET status = 'in_progress', phase = ?3, worker_id = ?2,
                 started_at = COALESCE(started_at, ?4), updated_at = ?4
             WHERE id = ?1
               AND status = 'pending'
               AND (SELECT COUNT(*) FROM jobs WHERE status = 'in_progress') < ?5
               AND (SELECT COUNT(*) FROM jobs AS member
                    WHERE member.status = 'in_progress'
                      AND member.batch_id IS (SELECT batch_id FROM jobs WHERE id = ?1)) < ?6",
            params![
                job_id,
                worker_id,
                JobPhase::Crawling.to_db_string(),
                now,
                global_cap,
                batch_cap
            ],
        )?;
        Ok(changed == 1)
    }

    fn claim_job(
        &mut self,
        job_id: i64,
        expected_owner: Option<&str>,
        new_owner: &str,
    ) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs SET worker_id = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'in_progress' AND worker_id IS ?2",
            params![job_id, expected_owner, new_owner, format_timestamp(&Utc::now())],
        )?;
        Ok(changed == 1)
    }

    fn count_jobs_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = JobStatus::from_db_string(&status) {
                counts.insert(status, count.max(0) as u64);
            }
        }
        Ok(counts)
    }

    // ===== Batch Management =====

    fn insert_batch(&mut self, batch: &BatchRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO batches (id, name, status, priority, max_concurrent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                batch.id,
                batch.name,
                batch.status.to_db_string(),
                batch.priority,
                batch.max_concurrent,
                format_timestamp(&batch.created_at)
            ],
        )?;
        self.update_batch(batch)
    }

    fn get_batch(&self, batch_id: &str) -> StorageResult<BatchRecord> {
        let sql = format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS);
        self.conn
            .query_row(&sql, params![batch_id], |row| Ok(read_batch_row(row)))
            .optional()?
            .ok_or_else(|| StorageError::BatchNotFound(batch_id.to_string()))?
    }

    fn update_batch(&mut self, batch: &BatchRecord) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE batches SET name = ?2, status = ?3, priority = ?4, max_concurrent = ?5,
                 started_at = ?6, completed_at = ?7, total_jobs = ?8, pending_jobs = ?9,
                 in_progress_jobs = ?10, paused_jobs = ?11, completed_jobs = ?12,
                 failed_jobs = ?13, tokens_used = ?14, cost_usd = ?15
             WHERE id = ?1",
            params![
                batch.id,
                batch.name,
                batch.status.to_db_string(),
                batch.priority,
                batch.max_concurrent,
                batch.started_at.as_ref().map(format_timestamp),
                batch.completed_at.as_ref().map(format_timestamp),
                batch.counts.total,
                batch.counts.pending,
                batch.counts.in_progress,
                batch.counts.paused,
                batch.counts.completed,
                batch.counts.failed,
                batch.tokens_used as i64,
                batch.cost_usd,
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::BatchNotFound(batch.id.clone()));
        }
        Ok(())
    }

    fn list_batches_by_status(&self, status: BatchStatus) -> StorageResult<Vec<BatchRecord>> {
        let sql = format!(
            "SELECT {} FROM batches WHERE status = ?1 ORDER BY priority, created_at, rowid",
            BATCH_COLUMNS
        );
        self.query_batches(&sql, params![status.to_db_string()])
    }

    fn list_batches(&self) -> StorageResult<Vec<BatchRecord>> {
        let sql = format!(
            "SELECT {} FROM batches ORDER BY priority, created_at, rowid",
            BATCH_COLUMNS
        );
        self.query_batches(&sql, [])
    }

    fn delete_batch(&mut self, batch_id: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE jobs SET batch_id = NULL WHERE batch_id = ?1",
            params![batch_id],
        )?;
        let deleted = tx.execute("DELETE FROM batches WHERE id = ?1", params![batch_id])?;
        if deleted == 0 {
            return Err(StorageError::BatchNotFound(batch_id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Checkpoints =====

    fn save_checkpoint(&mut self, job_id: i64, data: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO checkpoints (job_id, data, saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET data = excluded.data, saved_at = excluded.saved_at",
            params![job_id, data, format_timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    fn load_checkpoint(&self, job_id: i64) -> StorageResult<Option<String>> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM checkpoints WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn delete_checkpoint(&mut self, job_id: i64) -> StorageResult<()> {
        self.conn
            .execute("DELETE FROM checkpoints WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    // ===== Crawled Pages =====

    fn insert_page(&mut self, job_id: i64, page: &CrawledPage) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawled_pages (job_id, url, final_url, depth, page_type, status_code,
                 title, text, content_hash, is_duplicate, error, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job_id,
                page.url,
                page.final_url,
                page.depth,
                page.page_type.to_db_string(),
                page.status_code,
                page.title,
                page.text,
                page.content_hash,
                page.is_duplicate,
                page.error,
                format_timestamp(&page.crawled_at),
            ],
        )?;
        Ok(())
    }

    fn list_pages(&self, job_id: i64) -> StorageResult<Vec<CrawledPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, final_url, depth, page_type, status_code, title, text, content_hash,
                    is_duplicate, error, crawled_at
             FROM crawled_pages WHERE job_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![job_id], |row| Ok(read_page_row(row)))?;

        let mut pages = Vec::new();
        for row in rows {
            pages.push(row??);
        }
        Ok(pages)
    }

    fn count_pages(&self, job_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawled_pages WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    // ===== Leases =====

    fn try_acquire_lease(&mut self, key: &str, owner: &str, ttl: Duration) -> StorageResult<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2);

        let changed = self.conn.execute(
            "INSERT INTO leases (key, owner, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
             WHERE leases.owner = excluded.owner OR leases.expires_at <= ?4",
            params![key, owner, expires_at, now],
        )?;
        Ok(changed == 1)
    }

    fn release_lease(&mut self, key: &str, owner: &str) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM leases WHERE key = ?1 AND owner = ?2",
            params![key, owner],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SqliteStorage {
        SqliteStorage::new_in_memory().unwrap()
    }

    fn batch(id: &str, priority: i32, max_concurrent: u32) -> BatchRecord {
        BatchRecord {
            id: id.to_string(),
            name: format!("batch {}", id),
            status: BatchStatus::Processing,
            priority,
            max_concurrent,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            counts: BatchCounts::default(),
            tokens_used: 0,
            cost_usd: 0.0,
        }
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intel.db");
        let mut storage = SqliteStorage::new(&path).unwrap();
        storage.insert_job("Acme", "https://acme.com", None).unwrap();
        drop(storage);

        let storage = SqliteStorage::new(&path).unwrap();
        assert_eq!(storage.list_jobs_by_status(JobStatus::Pending).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_and_get_job() {
        let mut storage = storage();
        let id = storage.insert_job("Acme", "https://acme.com", None).unwrap();
        let job = storage.get_job(id).unwrap();

        assert_eq!(job.company_name, "Acme");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.phase, JobPhase::Queued);
        assert!(job.started_at.is_none());
        assert!(job.paused_at.is_none());
        assert_eq!(job.paused_duration_ms, 0);
    }

    #[test]
    fn test_get_missing_job() {
        let storage = storage();
        assert!(matches!(storage.get_job(99), Err(StorageError::JobNotFound(99))));
    }

    #[test]
    fn test_update_job_roundtrip() {
        let mut storage = storage();
        let id = storage.insert_job("Acme", "https://acme.com", None).unwrap();
        let mut job = storage.get_job(id).unwrap();

        job.status = JobStatus::Paused;
        job.phase = JobPhase::Analyzing;
        job.paused_at = Some(Utc::now());
        job.paused_duration_ms = 1500;
        job.failure_reason = Some("none".to_string());
        storage.update_job(&job).unwrap();

        let loaded = storage.get_job(id).unwrap();
        assert_eq!(loaded.status, JobStatus::Paused);
        assert_eq!(loaded.phase, JobPhase::Analyzing);
        assert_eq!(loaded.paused_duration_ms, 1500);
        assert!(loaded.paused_at.is_some());
    }

    #[test]
    fn test_transition_job_checks_current_status() {
        let mut storage = storage();
        let id = storage.insert_job("Acme", "https://acme.com", None).unwrap();
        storage.update_job_progress(id, 7, 3).unwrap();

        let mut job = storage.get_job(id).unwrap();
        job.status = JobStatus::InProgress;
        job.phase = JobPhase::Crawling;
        job.pages_crawled = 0;
        assert!(storage.transition_job(&job, &[JobStatus::Pending]).unwrap());

        let stored = storage.get_job(id).unwrap();
        assert_eq!(stored.status, JobStatus::InProgress);
        // Progress counters are not part of a transition
        assert_eq!(stored.pages_crawled, 7);

        // Stored status is no longer pending
        job.status = JobStatus::Failed;
        assert!(!storage.transition_job(&job, &[JobStatus::Pending]).unwrap());
        assert!(!storage.transition_job(&job, &[]).unwrap());
        assert_eq!(storage.get_job(id).unwrap().status, JobStatus::InProgress);

        job.id = 999;
        assert!(!storage.transition_job(&job, &[JobStatus::InProgress]).unwrap());
    }

    #[test]
    fn test_progress_and_usage() {
        let mut storage = storage();
        let id = storage.insert_job("Acme", "https://acme.com", None).unwrap();
        storage.update_job_progress(id, 12, 30).unwrap();
        storage.add_job_usage(id, 1000, 0.5).unwrap();
        storage.add_job_usage(id, 500, 0.25).unwrap();

        let job = storage.get_job(id).unwrap();
        assert_eq!(job.pages_crawled, 12);
        assert_eq!(job.entities_extracted, 30);
        assert_eq!(job.tokens_used, 1500);
        assert!((job.cost_usd - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_admission_respects_ceilings() {
        let mut storage = storage();
        storage.insert_batch(&batch("b1", 0, 1)).unwrap();
        let a = storage.insert_job("A", "https://a.com", Some("b1")).unwrap();
        let b = storage.insert_job("B", "https://b.com", Some("b1")).unwrap();
        let c = storage.insert_job("C", "https://c.com", None).unwrap();

        assert!(storage.try_admit_job(a, "w1", 10, 1).unwrap());
        // Batch ceiling reached
        assert!(!storage.try_admit_job(b, "w1", 10, 1).unwrap());
        // Global ceiling reached
        assert!(!storage.try_admit_job(c, "w1", 1, 10).unwrap());
        // Not pending any more
        assert!(!storage.try_admit_job(a, "w1", 10, 10).unwrap());

        let admitted = storage.get_job(a).unwrap();
        assert_eq!(admitted.status, JobStatus::InProgress);
        assert_eq!(admitted.phase, JobPhase::Crawling);
        assert_eq!(admitted.worker_id.as_deref(), Some("w1"));
        assert!(admitted.started_at.is_some());

        assert_eq!(storage.count_in_progress(None).unwrap(), 1);
        assert_eq!(storage.count_in_progress(Some("b1")).unwrap(), 1);
        assert_eq!(storage.oldest_pending_job("b1").unwrap().map(|j| j.id), Some(b));
    }

    #[test]
    fn test_claim_job_is_conditional() {
        let mut storage = storage();
        let id = storage.insert_job("A", "https://a.com", None).unwrap();
        assert!(!storage.claim_job(id, None, "w2").unwrap());

        storage.try_admit_job(id, "w1", 10, 10).unwrap();
        assert!(!storage.claim_job(id, Some("other"), "w2").unwrap());
        assert!(storage.claim_job(id, Some("w1"), "w2").unwrap());
        assert!(!storage.claim_job(id, Some("w1"), "w2").unwrap());
        assert_eq!(storage.get_job(id).unwrap().worker_id.as_deref(), Some("w2"));
    }

    #[test]
    fn test_batches_ordered_by_priority_then_age() {
        let mut storage = storage();
        let mut late = batch("late", 1, 2);
        late.created_at = Utc::now() + chrono::Duration::seconds(5);
        storage.insert_batch(&late).unwrap();
        storage.insert_batch(&batch("early", 1, 2)).unwrap();
        storage.insert_batch(&batch("urgent", 0, 2)).unwrap();

        let ids: Vec<String> = storage
            .list_batches_by_status(BatchStatus::Processing)
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["urgent", "early", "late"]);
    }

    #[test]
    fn test_delete_batch_keeps_jobs() {
        let mut storage = storage();
        storage.insert_batch(&batch("b1", 0, 2)).unwrap();
        let id = storage.insert_job("A", "https://a.com", Some("b1")).unwrap();

        storage.delete_batch("b1").unwrap();
        assert!(matches!(
            storage.get_batch("b1"),
            Err(StorageError::BatchNotFound(_))
        ));
        assert_eq!(storage.get_job(id).unwrap().batch_id, None);
        assert!(storage.delete_batch("b1").is_err());
    }

    #[test]
    fn test_assign_jobs_to_batch() {
        let mut storage = storage();
        storage.insert_batch(&batch("b1", 0, 2)).unwrap();
        let a = storage.insert_job("A", "https://a.com", None).unwrap();
        storage.assign_jobs_to_batch(&[a], "b1").unwrap();
        assert_eq!(storage.list_batch_jobs("b1").unwrap().len(), 1);
        assert!(storage.assign_jobs_to_batch(&[404], "b1").is_err());
    }

    #[test]
    fn test_checkpoint_overwrite() {
        let mut storage = storage();
        let id = storage.insert_job("A", "https://a.com", None).unwrap();
        assert_eq!(storage.load_checkpoint(id).unwrap(), None);

        storage.save_checkpoint(id, "{\"version\":2}").unwrap();
        storage.save_checkpoint(id, "{\"version\":3}").unwrap();
        assert_eq!(
            storage.load_checkpoint(id).unwrap().as_deref(),
            Some("{\"version\":3}")
        );

        storage.delete_checkpoint(id).unwrap();
        assert_eq!(storage.load_checkpoint(id).unwrap(), None);
    }

    #[test]
    fn test_pages_roundtrip() {
        let mut storage = storage();
        let id = storage.insert_job("A", "https://a.com", None).unwrap();
        let mut page = CrawledPage::failed("https://a.com/x", 1, PageType::Team, "HTTP 500");
        page.status_code = Some(500);
        storage.insert_page(id, &page).unwrap();

        let pages = storage.list_pages(id).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_type, PageType::Team);
        assert_eq!(pages[0].status_code, Some(500));
        assert_eq!(pages[0].error.as_deref(), Some("HTTP 500"));
        assert_eq!(storage.count_pages(id).unwrap(), 1);
    }

    #[test]
    fn test_lease_exclusive_until_expiry() {
        let mut storage = storage();
        let ttl = Duration::from_secs(30);

        assert!(storage.try_acquire_lease("job:1", "w1", ttl).unwrap());
        assert!(!storage.try_acquire_lease("job:1", "w2", ttl).unwrap());
        // Same owner refreshes
        assert!(storage.try_acquire_lease("job:1", "w1", ttl).unwrap());

        // Releasing someone else's lease is a no-op
        storage.release_lease("job:1", "w2").unwrap();
        assert!(!storage.try_acquire_lease("job:1", "w2", ttl).unwrap());

        storage.release_lease("job:1", "w1").unwrap();
        assert!(storage.try_acquire_lease("job:1", "w2", ttl).unwrap());
    }

    #[test]
    fn test_expired_lease_can_be_taken() {
        let mut storage = storage();
        assert!(storage
            .try_acquire_lease("job:1", "w1", Duration::ZERO)
            .unwrap());
        assert!(storage
            .try_acquire_lease("job:1", "w2", Duration::from_secs(30))
            .unwrap());
    }

    #[test]
    fn test_count_jobs_by_status() {
        let mut storage = storage();
        let a = storage.insert_job("A", "https://a.com", None).unwrap();
        storage.insert_job("B", "https://b.com", None).unwrap();
        storage.try_admit_job(a, "w1", 5, 5).unwrap();

        let counts = storage.count_jobs_by_status().unwrap();
        assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
        assert_eq!(counts.get(&JobStatus::InProgress), Some(&1));
    }
}
