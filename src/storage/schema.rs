//! Database schema definitions
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text so that string
//! comparison orders them chronologically.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Named groups of company jobs
CREATE TABLE IF NOT EXISTS batches (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    max_concurrent INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    total_jobs INTEGER NOT NULL DEFAULT 0,
    pending_jobs INTEGER NOT NULL DEFAULT 0,
    in_progress_jobs INTEGER NOT NULL DEFAULT 0,
    paused_jobs INTEGER NOT NULL DEFAULT 0,
    completed_jobs INTEGER NOT NULL DEFAULT 0,
    failed_jobs INTEGER NOT NULL DEFAULT 0,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_batches_status ON batches(status, priority, created_at);

-- One pipeline instance per company
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_name TEXT NOT NULL,
    website TEXT NOT NULL,
    batch_id TEXT REFERENCES batches(id) ON DELETE SET NULL,
    status TEXT NOT NULL,
    phase TEXT NOT NULL,
    worker_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    paused_at TEXT,
    completed_at TEXT,
    paused_duration_ms INTEGER NOT NULL DEFAULT 0,
    failure_reason TEXT,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    entities_extracted INTEGER NOT NULL DEFAULT 0,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_batch ON jobs(batch_id, status);

-- Latest checkpoint per job (JSON)
CREATE TABLE IF NOT EXISTS checkpoints (
    job_id INTEGER PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    data TEXT NOT NULL,
    saved_at TEXT NOT NULL
);

-- Pages crawled for a job
CREATE TABLE IF NOT EXISTS crawled_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    final_url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    page_type TEXT NOT NULL,
    status_code INTEGER,
    title TEXT,
    text TEXT NOT NULL,
    content_hash TEXT,
    is_duplicate INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    crawled_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawled_pages_job ON crawled_pages(job_id);

-- Expiring locks (pause/resume arbitration)
CREATE TABLE IF NOT EXISTS leases (
    key TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["batches", "jobs", "checkpoints", "crawled_pages", "leases"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
