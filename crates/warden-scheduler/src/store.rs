//! Durable job store seam and an in-memory implementation.
//! The SQLite implementation lives in [`crate::persistence`].

use std::sync::{Arc, Mutex};

use warden_core::error::{Result, WardenError};

use crate::keys::JobKey;
use crate::tasks::Job;

/// Durable storage behind the [`SchedulerEngine`](crate::engine::SchedulerEngine).
///
/// The store is the source of truth shared by every process using the same
/// database. `load_all` must return jobs in registration order: a replaced
/// key keeps its original position.
pub trait JobStore: Send + Sync {
    /// Insert or replace every job in one atomic write. Either all rows
    /// change or none do.
    fn upsert_all(&self, jobs: &[Job]) -> Result<()>;

    /// Insert or replace the job under `job.key`.
    fn upsert(&self, job: &Job) -> Result<()> {
        self.upsert_all(std::slice::from_ref(job))
    }

    /// Remove a job. Returns whether it existed.
    fn remove(&self, key: &JobKey) -> Result<bool>;

    fn load_all(&self) -> Result<Vec<Job>>;

    /// Persist run bookkeeping (`last_run`, `next_run`, `run_count`).
    ///
    /// Skipped when the stored row no longer carries `job.cron`: the trigger
    /// was replaced after this run was computed.
    fn record_run(&self, job: &Job) -> Result<()>;
}

/// In-memory job store. Clones share the same underlying jobs.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored jobs.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Job>>> {
        self.jobs
            .lock()
            .map_err(|e| WardenError::Storage(format!("Job store lock poisoned: {e}")))
    }
}

impl JobStore for MemoryJobStore {
    fn upsert_all(&self, batch: &[Job]) -> Result<()> {
        let mut jobs = self.lock()?;
        for job in batch {
            match jobs.iter_mut().find(|j| j.key == job.key) {
                Some(existing) => *existing = job.clone(),
                None => jobs.push(job.clone()),
            }
        }
        Ok(())
    }

    fn remove(&self, key: &JobKey) -> Result<bool> {
        let mut jobs = self.lock()?;
        let len = jobs.len();
        jobs.retain(|j| &j.key != key);
        Ok(jobs.len() < len)
    }

    fn load_all(&self) -> Result<Vec<Job>> {
        Ok(self.lock()?.clone())
    }

    fn record_run(&self, job: &Job) -> Result<()> {
        let mut jobs = self.lock()?;
        if let Some(existing) = jobs.iter_mut().find(|j| j.key == job.key && j.cron == job.cron) {
            existing.last_run = job.last_run;
            existing.next_run = job.next_run;
            existing.run_count = job.run_count;
        }
        Ok(())
    }
}
