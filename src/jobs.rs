//! In-memory progress records for batches submitted in the background.
//!
//! Each record is written only by the task running its batch and read by
//! pollers, so readers may see a slightly stale snapshot.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::state_machine::{WorkflowResult, WorkflowStatus};

/// Lifecycle of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Progress snapshot of one batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub progress_percentage: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(total: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            progress_percentage: 0.0,
            message: format!("{total} product(s) queued"),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Counts one finished item. Only an ERROR result counts as failed;
    /// manual review is a normal outcome.
    fn record_item(&mut self, result: &WorkflowResult) {
        self.status = JobStatus::InProgress;
        self.processed += 1;
        if result.status == WorkflowStatus::Error {
            self.failed += 1;
        } else {
            self.successful += 1;
        }
        self.progress_percentage = percentage(self.processed, self.total);
        self.message = format!("{}/{} processed", self.processed, self.total);
        self.updated_at = Utc::now();
    }

    fn finish(&mut self, status: JobStatus, message: String) {
        let now = Utc::now();
        self.status = status;
        if status == JobStatus::Completed {
            self.progress_percentage = 100.0;
        }
        self.message = message;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

fn percentage(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (processed as f64 / total as f64 * 100.0).min(100.0)
}

#[derive(Debug)]
struct JobEntry {
    record: JobRecord,
    results: Option<Vec<WorkflowResult>>,
    finished: Option<Instant>,
}

/// Job records keyed by id. A record is dropped when its results are taken,
/// or `ttl` after it finishes if nobody takes them.
#[derive(Debug)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
    ttl: std::time::Duration,
}

impl JobStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending job for `total` products and returns its id.
    pub fn create(&self, total: usize) -> String {
        let record = JobRecord::new(total);
        let job_id = record.job_id.clone();
        self.write().insert(
            job_id.clone(),
            JobEntry {
                record,
                results: None,
                finished: None,
            },
        );
        job_id
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.read().get(job_id).map(|entry| entry.record.clone())
    }

    pub fn record_item(&self, job_id: &str, result: &WorkflowResult) {
        if let Some(entry) = self.write().get_mut(job_id) {
            entry.record.record_item(result);
        }
    }

    pub fn complete(&self, job_id: &str, results: Vec<WorkflowResult>) {
        if let Some(entry) = self.write().get_mut(job_id) {
            let message = format!(
                "{} succeeded, {} failed",
                entry.record.successful, entry.record.failed
            );
            entry.record.finish(JobStatus::Completed, message);
            entry.results = Some(results);
            entry.finished = Some(Instant::now());
        }
    }

    pub fn fail(&self, job_id: &str, message: impl Into<String>) {
        if let Some(entry) = self.write().get_mut(job_id) {
            entry.record.finish(JobStatus::Failed, message.into());
            entry.finished = Some(Instant::now());
        }
    }

    /// Hands out the results of a finished job and forgets the job.
    ///
    /// `None` for an unknown job. `Some(None)` while the job is still running,
    /// or once a failed job is acknowledged.
    pub fn take_results(&self, job_id: &str) -> Option<Option<Vec<WorkflowResult>>> {
        let mut jobs = self.write();
        if !jobs.get(job_id)?.record.status.is_finished() {
            return Some(None);
        }
        jobs.remove(job_id).map(|entry| entry.results)
    }

    pub fn ttl(&self) -> std::time::Duration {
        self.ttl
    }

    /// Drops finished jobs whose completion is older than the TTL.
    pub fn reap_expired(&self) -> usize {
        self.reap_expired_at(Instant::now())
    }

    pub(crate) fn reap_expired_at(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.finished {
            Some(done) => now.saturating_duration_since(done) <= ttl,
            None => true,
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
