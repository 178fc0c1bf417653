//! JobStore (C6): durable key-value storage of `Job` and `SubJob` documents
//! with a secondary index by `(source, status, started_at desc)` (§4.6).
//!
//! Persists to a local SQLite file, matching the teacher's SQLite-backed job
//! queue idiom; the teacher's own job-queue module didn't survive into the
//! retrieved pack, so the schema and queries here are built fresh against
//! `rusqlite` rather than adapted from teacher source.

use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::JobStoreError(format!("unrecognized job status '{other}'"))),
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Five non-negative, saturating counters shared by `Job` and `SubJob` (§3.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub total_chunks: u64,
    pub total_documents: u64,
}

impl JobStats {
    /// Sum of `self` and `other`, saturating rather than overflowing.
    pub fn add(&self, other: &JobStats) -> JobStats {
        JobStats {
            total_files: self.total_files.saturating_add(other.total_files),
            processed_files: self.processed_files.saturating_add(other.processed_files),
            failed_files: self.failed_files.saturating_add(other.failed_files),
            total_chunks: self.total_chunks.saturating_add(other.total_chunks),
            total_documents: self.total_documents.saturating_add(other.total_documents),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub source: String,
    pub collection_name: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub stats: JobStats,
    pub error: Option<String>,
    pub total_batches: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubJob {
    pub sub_job_id: String,
    pub parent_job_id: String,
    pub batch_index: i64,
    pub status: JobStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub stats: JobStats,
    pub error: Option<String>,
}

/// Per-status sub-job counts plus their aggregated stats, returned alongside
/// the parent by `get_job_with_sub_jobs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubJobAggregate {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub stats: JobStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWithSubJobs {
    pub job: Job,
    pub sub_jobs: Vec<SubJob>,
    pub aggregate: SubJobAggregate,
}

pub struct JobStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    job_id          TEXT PRIMARY KEY,
    status          TEXT NOT NULL,
    source          TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    completed_at    TEXT,
    stats           TEXT NOT NULL,
    error           TEXT,
    total_batches   INTEGER
);
CREATE INDEX IF NOT EXISTS idx_jobs_source_status ON jobs(source, status);
CREATE INDEX IF NOT EXISTS idx_jobs_started_at ON jobs(started_at DESC);

CREATE TABLE IF NOT EXISTS sub_jobs (
    sub_job_id    TEXT PRIMARY KEY,
    parent_job_id TEXT NOT NULL,
    batch_index   INTEGER NOT NULL,
    status        TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    completed_at  TEXT,
    stats         TEXT NOT NULL,
    error         TEXT
);
CREATE INDEX IF NOT EXISTS idx_sub_jobs_parent ON sub_jobs(parent_job_id);
";

impl JobStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_job(&self, source: &str, collection_name: &str) -> Result<Job> {
        let job = Job {
            job_id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            source: source.to_string(),
            collection_name: collection_name.to_string(),
            started_at: crate::chunking::now_iso8601(),
            completed_at: None,
            stats: JobStats::default(),
            error: None,
            total_batches: None,
        };
        self.conn().execute(
            "INSERT INTO jobs (job_id, status, source, collection_name, started_at, completed_at, stats, error, total_batches)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, NULL, NULL)",
            params![
                job.job_id,
                job.status.as_str(),
                job.source,
                job.collection_name,
                job.started_at,
                stats_json(&job.stats)?,
            ],
        )?;
        Ok(job)
    }

    pub fn create_sub_job(&self, parent: &Job, batch_index: i64, total_files: u64) -> Result<SubJob> {
        let sub_job = SubJob {
            sub_job_id: format!("{}_{:04}", parent.job_id, batch_index),
            parent_job_id: parent.job_id.clone(),
            batch_index,
            status: JobStatus::Pending,
            started_at: crate::chunking::now_iso8601(),
            completed_at: None,
            stats: JobStats { total_files, ..Default::default() },
            error: None,
        };
        self.conn().execute(
            "INSERT INTO sub_jobs (sub_job_id, parent_job_id, batch_index, status, started_at, completed_at, stats, error)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, NULL)",
            params![
                sub_job.sub_job_id,
                sub_job.parent_job_id,
                sub_job.batch_index,
                sub_job.status.as_str(),
                sub_job.started_at,
                stats_json(&sub_job.stats)?,
            ],
        )?;
        Ok(sub_job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.conn()
            .query_row("SELECT * FROM jobs WHERE job_id = ?1", params![job_id], row_to_job)
            .optional()
            .map_err(Error::from)
    }

    pub fn get_sub_job(&self, sub_job_id: &str) -> Result<Option<SubJob>> {
        self.conn()
            .query_row("SELECT * FROM sub_jobs WHERE sub_job_id = ?1", params![sub_job_id], row_to_sub_job)
            .optional()
            .map_err(Error::from)
    }

    pub fn mark_running(&self, job_id: &str) -> Result<()> {
        self.set_job_status(job_id, JobStatus::Running, None, None)
    }

    pub fn mark_completed(&self, job_id: &str, stats: JobStats) -> Result<()> {
        self.set_job_status(job_id, JobStatus::Completed, Some(stats), None)
    }

    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<()> {
        self.set_job_status(job_id, JobStatus::Failed, None, Some(error.to_string()))
    }

    pub fn update_stats(&self, job_id: &str, stats: JobStats) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET stats = ?1 WHERE job_id = ?2",
            params![stats_json(&stats)?, job_id],
        )?;
        Ok(())
    }

    /// Records the parent Job's computed batch count (§3.1 `total_batches`),
    /// set once the Orchestrator has decided to fan out (§4.8 step 7).
    pub fn set_total_batches(&self, job_id: &str, total_batches: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE jobs SET total_batches = ?1 WHERE job_id = ?2",
            params![total_batches, job_id],
        )?;
        Ok(())
    }

    /// Idempotent status transition. A terminal status may be written again
    /// (retries) but `completed_at`, once set, never moves backward and an
    /// already-terminal `started_at` is left alone.
    fn set_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        stats: Option<JobStats>,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn();
        let existing = conn
            .query_row("SELECT status, completed_at FROM jobs WHERE job_id = ?1", params![job_id], |row| {
                let status: String = row.get(0)?;
                let completed_at: Option<String> = row.get(1)?;
                Ok((status, completed_at))
            })
            .optional()?;
        let Some((existing_status, existing_completed_at)) = existing else {
            return Err(Error::JobStoreError(format!("job '{job_id}' not found")));
        };
        let existing_status = JobStatus::parse(&existing_status)?;

        let completed_at = if status.is_terminal() {
            existing_completed_at.or_else(|| if existing_status.is_terminal() { None } else { Some(crate::chunking::now_iso8601()) })
                .or_else(|| Some(crate::chunking::now_iso8601()))
        } else {
            None
        };

        match (stats, error) {
            (Some(stats), _) => conn.execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2, stats = ?3, error = NULL WHERE job_id = ?4",
                params![status.as_str(), completed_at, stats_json(&stats)?, job_id],
            )?,
            (None, Some(error)) => conn.execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2, error = ?3 WHERE job_id = ?4",
                params![status.as_str(), completed_at, error, job_id],
            )?,
            (None, None) => conn.execute(
                "UPDATE jobs SET status = ?1, completed_at = ?2 WHERE job_id = ?3",
                params![status.as_str(), completed_at, job_id],
            )?,
        };
        Ok(())
    }

    pub fn mark_sub_job_running(&self, sub_job_id: &str) -> Result<()> {
        self.set_sub_job_status(sub_job_id, JobStatus::Running, None, None)
    }

    pub fn mark_sub_job_completed(&self, sub_job_id: &str, stats: JobStats) -> Result<()> {
        self.set_sub_job_status(sub_job_id, JobStatus::Completed, Some(stats), None)
    }

    pub fn mark_sub_job_failed(&self, sub_job_id: &str, error: &str) -> Result<()> {
        self.set_sub_job_status(sub_job_id, JobStatus::Failed, None, Some(error.to_string()))
    }

    fn set_sub_job_status(
        &self,
        sub_job_id: &str,
        status: JobStatus,
        stats: Option<JobStats>,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn();
        let existing = conn
            .query_row(
                "SELECT status, completed_at FROM sub_jobs WHERE sub_job_id = ?1",
                params![sub_job_id],
                |row| {
                    let status: String = row.get(0)?;
                    let completed_at: Option<String> = row.get(1)?;
                    Ok((status, completed_at))
                },
            )
            .optional()?;
        let Some((existing_status, existing_completed_at)) = existing else {
            return Err(Error::JobStoreError(format!("sub-job '{sub_job_id}' not found")));
        };
        let existing_status = JobStatus::parse(&existing_status)?;

        let completed_at = if status.is_terminal() {
            existing_completed_at.or_else(|| if existing_status.is_terminal() { None } else { Some(crate::chunking::now_iso8601()) })
                .or_else(|| Some(crate::chunking::now_iso8601()))
        } else {
            None
        };

        match (stats, error) {
            (Some(stats), _) => conn.execute(
                "UPDATE sub_jobs SET status = ?1, completed_at = ?2, stats = ?3, error = NULL WHERE sub_job_id = ?4",
                params![status.as_str(), completed_at, stats_json(&stats)?, sub_job_id],
            )?,
            (None, Some(error)) => conn.execute(
                "UPDATE sub_jobs SET status = ?1, completed_at = ?2, error = ?3 WHERE sub_job_id = ?4",
                params![status.as_str(), completed_at, error, sub_job_id],
            )?,
            (None, None) => conn.execute(
                "UPDATE sub_jobs SET status = ?1, completed_at = ?2 WHERE sub_job_id = ?3",
                params![status.as_str(), completed_at, sub_job_id],
            )?,
        };
        Ok(())
    }

    pub fn list_jobs(&self, source: Option<&str>, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut sql = "SELECT * FROM jobs WHERE 1=1".to_string();
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(source) = source {
            sql.push_str(" AND source = ?");
            bound.push(Box::new(source.to_string()));
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            bound.push(Box::new(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY started_at DESC LIMIT ?");
        bound.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), row_to_job)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    pub fn get_job_with_sub_jobs(&self, job_id: &str) -> Result<Option<JobWithSubJobs>> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(None);
        };
        let sub_jobs = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT * FROM sub_jobs WHERE parent_job_id = ?1 ORDER BY batch_index ASC")?;
            let rows = stmt.query_map(params![job_id], row_to_sub_job)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut aggregate = SubJobAggregate::default();
        for sub_job in &sub_jobs {
            match sub_job.status {
                JobStatus::Pending => aggregate.pending += 1,
                JobStatus::Running => aggregate.running += 1,
                JobStatus::Completed => aggregate.completed += 1,
                JobStatus::Failed => aggregate.failed += 1,
            }
            aggregate.stats = aggregate.stats.add(&sub_job.stats);
        }

        Ok(Some(JobWithSubJobs { job, sub_jobs, aggregate }))
    }

    /// Deletes jobs (and their sub-jobs) whose `started_at` predates
    /// `now - days`. Returns the number of parent jobs removed.
    pub fn cleanup_old(&self, days: i64) -> Result<usize> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let conn = self.conn();
        let stale_ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT job_id FROM jobs WHERE started_at < ?1")?;
            let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for job_id in &stale_ids {
            conn.execute("DELETE FROM sub_jobs WHERE parent_job_id = ?1", params![job_id])?;
        }
        conn.execute("DELETE FROM jobs WHERE started_at < ?1", params![cutoff])?;
        Ok(stale_ids.len())
    }
}

fn stats_json(stats: &JobStats) -> Result<String> {
    serde_json::to_string(stats).map_err(|e| Error::JobStoreError(format!("failed to serialize stats: {e}")))
}

fn parse_stats(raw: &str) -> rusqlite::Result<JobStats> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let status: String = row.get("status")?;
    let stats: String = row.get("stats")?;
    Ok(Job {
        job_id: row.get("job_id")?,
        status: JobStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        source: row.get("source")?,
        collection_name: row.get("collection_name")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        stats: parse_stats(&stats)?,
        error: row.get("error")?,
        total_batches: row.get("total_batches")?,
    })
}

fn row_to_sub_job(row: &Row) -> rusqlite::Result<SubJob> {
    let status: String = row.get("status")?;
    let stats: String = row.get("stats")?;
    Ok(SubJob {
        sub_job_id: row.get("sub_job_id")?,
        parent_job_id: row.get("parent_job_id")?,
        batch_index: row.get("batch_index")?,
        status: JobStatus::parse(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        stats: parse_stats(&stats)?,
        error: row.get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> JobStore {
        JobStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_job_starts_pending_with_zeroed_stats() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.stats, JobStats::default());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn sub_job_id_follows_parent_batch_index_convention() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        let sub = store.create_sub_job(&job, 7, 42).unwrap();
        assert_eq!(sub.sub_job_id, format!("{}_0007", job.job_id));
        assert_eq!(sub.stats.total_files, 42);
    }

    #[test]
    fn lifecycle_transitions_round_trip_through_get_job() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        store.mark_running(&job.job_id).unwrap();
        assert_eq!(store.get_job(&job.job_id).unwrap().unwrap().status, JobStatus::Running);

        let stats = JobStats { total_files: 3, processed_files: 3, ..Default::default() };
        store.mark_completed(&job.job_id, stats).unwrap();
        let completed = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.stats, stats);
        assert!(completed.completed_at.is_some());
    }

    #[test]
    fn marking_failed_twice_does_not_rewind_completed_at() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        store.mark_failed(&job.job_id, "boom").unwrap();
        let first = store.get_job(&job.job_id).unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.mark_failed(&job.job_id, "boom again").unwrap();
        let second = store.get_job(&job.job_id).unwrap().unwrap();

        assert_eq!(first.completed_at, second.completed_at);
        assert_eq!(second.error.as_deref(), Some("boom again"));
    }

    #[test]
    fn update_stats_does_not_change_status() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        store.mark_running(&job.job_id).unwrap();
        store.update_stats(&job.job_id, JobStats { total_files: 10, ..Default::default() }).unwrap();
        let updated = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(updated.stats.total_files, 10);
    }

    #[test]
    fn list_jobs_filters_by_source_and_status_and_orders_newest_first() {
        let store = store();
        let a = store.create_job("handbook", "thoth_documents").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create_job("handbook", "thoth_documents").unwrap();
        store.mark_running(&b.job_id).unwrap();
        store.create_job("dnd", "dnd_documents").unwrap();

        let handbook_jobs = store.list_jobs(Some("handbook"), None, 10).unwrap();
        assert_eq!(handbook_jobs.len(), 2);
        assert_eq!(handbook_jobs[0].job_id, b.job_id);
        assert_eq!(handbook_jobs[1].job_id, a.job_id);

        let running = store.list_jobs(None, Some(JobStatus::Running), 10).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, b.job_id);
    }

    #[test]
    fn get_job_with_sub_jobs_aggregates_counts_and_stats() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        let s0 = store.create_sub_job(&job, 0, 5).unwrap();
        let s1 = store.create_sub_job(&job, 1, 5).unwrap();

        store.mark_sub_job_completed(&s0.sub_job_id, JobStats { total_files: 5, processed_files: 5, ..Default::default() }).unwrap();
        store.mark_sub_job_failed(&s1.sub_job_id, "disk full").unwrap();

        let combined = store.get_job_with_sub_jobs(&job.job_id).unwrap().unwrap();
        assert_eq!(combined.sub_jobs.len(), 2);
        assert_eq!(combined.aggregate.completed, 1);
        assert_eq!(combined.aggregate.failed, 1);
        assert_eq!(combined.aggregate.stats.processed_files, 5);
    }

    #[test]
    fn cleanup_old_removes_jobs_past_the_cutoff_and_their_sub_jobs() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        store.create_sub_job(&job, 0, 1).unwrap();

        store
            .conn()
            .execute(
                "UPDATE jobs SET started_at = ?1 WHERE job_id = ?2",
                params![(chrono::Utc::now() - chrono::Duration::days(400)).to_rfc3339(), job.job_id],
            )
            .unwrap();

        let removed = store.cleanup_old(90).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_job(&job.job_id).unwrap().is_none());
        assert!(store.get_sub_job(&format!("{}_0000", job.job_id)).unwrap().is_none());
    }

    #[test]
    fn set_total_batches_persists_on_the_job() {
        let store = store();
        let job = store.create_job("handbook", "thoth_documents").unwrap();
        store.set_total_batches(&job.job_id, 7).unwrap();
        assert_eq!(store.get_job(&job.job_id).unwrap().unwrap().total_batches, Some(7));
    }

    #[test]
    fn get_job_returns_none_for_unknown_id() {
        let store = store();
        assert!(store.get_job("nope").unwrap().is_none());
    }
}
