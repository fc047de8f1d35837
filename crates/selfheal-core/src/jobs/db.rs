//! Persistent job queue using redb.
//!
//! # Table design
//!
//! A single `JOBS` table uses a 24-byte composite key:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Byte ordering equals due-time ordering, so one range scan
//! `..=due_upper_bound(now)` returns every job due by `now`; only the
//! `Pending` filter is applied in code.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use super::job::{JobStatus, ScheduledJob};
use crate::error::{HealError, Result};

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

/// Key: 24-byte composite (timestamp_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded ScheduledJob
const JOBS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("jobs");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn job_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Upper bound for a range scan returning all jobs due by `now`.
fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = now.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    /// Open or create the queue at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(HealError::store)?;
        let wt = db.begin_write().map_err(HealError::store)?;
        wt.open_table(JOBS).map_err(HealError::store)?;
        wt.commit().map_err(HealError::store)?;
        Ok(Self { db })
    }

    /// Insert or overwrite a job. The key is derived from the trigger timestamp.
    pub fn insert(&self, job: &ScheduledJob) -> Result<()> {
        let key = job_key(job.trigger.key_ts(), job.id);
        let value = serde_json::to_vec(job)?;
        let wt = self.db.begin_write().map_err(HealError::store)?;
        {
            let mut table = wt.open_table(JOBS).map_err(HealError::store)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(HealError::store)?;
        }
        wt.commit().map_err(HealError::store)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<ScheduledJob> {
        self.list_all()?
            .into_iter()
            .find(|j| j.id == id)
            .ok_or_else(|| HealError::JobNotFound(id.to_string()))
    }

    /// Update the status (and attempt count) of the job identified by `id`.
    pub fn set_status(&self, id: Uuid, status: JobStatus, attempts: Option<u32>) -> Result<()> {
        let mut job = self.get(id)?;
        job.status = status;
        if let Some(n) = attempts {
            job.attempts = n;
        }
        job.updated_at = Utc::now();
        self.insert(&job)
    }

    /// Every `Pending` job whose trigger timestamp is `<= now`, in due order.
    pub fn range_due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>> {
        let upper = due_upper_bound(now);
        let rt = self.db.begin_read().map_err(HealError::store)?;
        let table = rt.open_table(JOBS).map_err(HealError::store)?;

        let mut result = Vec::new();
        for entry in table
            .range(..=upper.as_slice())
            .map_err(HealError::store)?
        {
            let (_, v) = entry.map_err(HealError::store)?;
            let job: ScheduledJob = serde_json::from_slice(v.value())?;
            if matches!(job.status, JobStatus::Pending) {
                result.push(job);
            }
        }
        Ok(result)
    }

    /// Mark every `Running` job older than `max_age` as `Failed`.
    ///
    /// Returns the number of jobs recovered.
    pub fn startup_recovery(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).map_err(HealError::store)?;
        let mut count = 0u32;
        for job in self.list_all()? {
            if matches!(job.status, JobStatus::Running) && job.updated_at < cutoff {
                self.set_status(
                    job.id,
                    JobStatus::Failed {
                        reason: "recovered from restart".into(),
                    },
                    None,
                )?;
                count += 1;
            }
        }
        if count > 0 {
            tracing::warn!(count, "recovered interrupted jobs");
        }
        Ok(count)
    }

    /// All jobs, newest first.
    pub fn list_all(&self) -> Result<Vec<ScheduledJob>> {
        let rt = self.db.begin_read().map_err(HealError::store)?;
        let table = rt.open_table(JOBS).map_err(HealError::store)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(HealError::store)? {
            let (_, v) = entry.map_err(HealError::store)?;
            result.push(serde_json::from_slice::<ScheduledJob>(v.value())?);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
