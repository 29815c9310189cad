//! Scheduler Engine — owns the job table and decides what is due.
//!
//! All mutation goes through `&mut self`, and the engine is shared as
//! `Arc<Mutex<SchedulerEngine>>`, so an upsert and a tick can never
//! interleave: a replaced trigger is either fully old or fully new when the
//! worker looks at it.
//!
//! The [`JobStore`] is the source of truth. Other processes (the CLI) write
//! to the same store, so every tick first reconciles the in-memory table
//! with it: replaced triggers are picked up and cancelled jobs dropped
//! before anything is considered due.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::Mutex;
use warden_core::error::Result;

use crate::cron::CronSchedule;
use crate::keys::JobKey;
use crate::store::{JobStore, MemoryJobStore};
use crate::tasks::{DueJob, Job, JobAction};

/// Engine handle shared between the worker and the lifecycle services.
pub type SharedScheduler = Arc<Mutex<SchedulerEngine>>;

/// The scheduler engine — manages jobs and reports due ones.
pub struct SchedulerEngine {
    jobs: Vec<Job>,
    store: Box<dyn JobStore>,
    offset: FixedOffset,
}

impl SchedulerEngine {
    /// Load persisted jobs from `store`. Missed fires are not replayed.
    pub fn new(store: Box<dyn JobStore>, offset: FixedOffset) -> Result<Self> {
        let jobs = store.load_all()?;
        let mut engine = Self {
            jobs,
            store,
            offset,
        };
        engine.recompute_next_runs(Utc::now());
        tracing::info!("⏰ Scheduler loaded {} job(s)", engine.jobs.len());
        Ok(engine)
    }

    /// Engine over a fresh in-memory store.
    pub fn in_memory(offset: FixedOffset) -> Self {
        Self {
            jobs: Vec::new(),
            store: Box::new(MemoryJobStore::new()),
            offset,
        }
    }

    /// Wrap into the shared handle.
    pub fn shared(self) -> SharedScheduler {
        Arc::new(Mutex::new(self))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Create or replace the job under `key`.
    ///
    /// The expression is validated before anything is written. Replacing a
    /// job keeps its creation time and run history but recomputes its next
    /// fire from the new expression.
    pub fn upsert(&mut self, key: JobKey, cron: &str, action: JobAction) -> Result<()> {
        self.upsert_all(vec![(key, cron.to_string(), action)])
    }

    /// Create or replace several jobs as one unit.
    ///
    /// Every expression is validated first and the store write is a single
    /// transaction, so on error no job changes.
    pub fn upsert_all(&mut self, entries: Vec<(JobKey, String, JobAction)>) -> Result<()> {
        let now = Utc::now();
        let mut batch = Vec::with_capacity(entries.len());
        for (key, cron, action) in entries {
            let schedule = CronSchedule::parse(&cron)?;
            let mut job = match self.get(&key) {
                Some(existing) => Job {
                    cron,
                    action,
                    updated_at: now,
                    ..existing.clone()
                },
                None => Job::new(key, &cron, action),
            };
            job.next_run = schedule.next_after(now, self.offset);
            batch.push(job);
        }

        self.store.upsert_all(&batch)?;

        for job in batch {
            tracing::info!("📅 Job upserted: '{}' ({}) [{}]", job.key, job.action.name(), job.cron);
            match self.jobs.iter_mut().find(|j| j.key == job.key) {
                Some(slot) => *slot = job,
                None => self.jobs.push(job),
            }
        }
        Ok(())
    }

    /// Remove the job under `key`. Absent keys are not an error.
    pub fn cancel(&mut self, key: &JobKey) -> Result<bool> {
        let removed = self.store.remove(key)?;
        let len = self.jobs.len();
        self.jobs.retain(|j| &j.key != key);
        let existed = removed || self.jobs.len() < len;
        if existed {
            tracing::info!("🗑️ Job cancelled: '{}'", key);
        } else {
            tracing::debug!("Job '{}' not scheduled, nothing to cancel", key);
        }
        Ok(existed)
    }

    pub fn get(&self, key: &JobKey) -> Option<&Job> {
        self.jobs.iter().find(|j| &j.key == key)
    }

    /// List all jobs in registration order.
    pub fn list_jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Collect jobs due at `now` and advance their triggers.
    ///
    /// Returned in trigger order; equal triggers keep registration order.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<DueJob> {
        self.reconcile(now);
        let mut due: Vec<(DateTime<Utc>, usize)> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.is_due(now))
            .filter_map(|(i, j)| j.next_run.map(|next| (next, i)))
            .collect();
        // Stable sort keeps registration order for ties.
        due.sort_by_key(|(next, _)| *next);

        let mut fired = Vec::with_capacity(due.len());
        for (scheduled_for, idx) in due {
            let offset = self.offset;
            let job = &mut self.jobs[idx];
            job.last_run = Some(now);
            job.run_count += 1;
            job.next_run = CronSchedule::parse(&job.cron)
                .ok()
                .and_then(|s| s.next_after(now, offset));

            tracing::info!("🔔 Job triggered: '{}' ({})", job.key, job.action.name());
            if let Err(e) = self.store.record_run(job) {
                tracing::warn!("⚠️ Failed to persist run of '{}': {e}", job.key);
            }

            fired.push(DueJob {
                key: job.key.clone(),
                action: job.action.clone(),
                scheduled_for,
            });
        }
        fired
    }

    /// Bring the in-memory table in line with the store.
    ///
    /// A job whose stored trigger and action match the local copy keeps the
    /// local bookkeeping. Anything replaced or added elsewhere is taken from
    /// the store as written; jobs missing from the store are dropped. If the
    /// store cannot be read the local table is used as is.
    fn reconcile(&mut self, now: DateTime<Utc>) {
        let stored = match self.store.load_all() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!("⚠️ Job store unreadable, ticking from memory: {e}");
                return;
            }
        };

        let offset = self.offset;
        let mut local: HashMap<JobKey, Job> =
            self.jobs.drain(..).map(|j| (j.key.clone(), j)).collect();
        let mut changed = 0;
        self.jobs = stored
            .into_iter()
            .map(|mut theirs| match local.remove(&theirs.key) {
                Some(ours) if ours.cron == theirs.cron && ours.action == theirs.action => ours,
                _ => {
                    changed += 1;
                    if theirs.next_run.is_none() {
                        theirs.next_run = CronSchedule::parse(&theirs.cron)
                            .ok()
                            .and_then(|s| s.next_after(now, offset));
                    }
                    theirs
                }
            })
            .collect();

        let dropped = local.len();
        if changed > 0 || dropped > 0 {
            tracing::info!(
                "🔄 Picked up {} changed and {} removed job(s) from the store",
                changed,
                dropped
            );
        }
    }

    /// Recompute next_run for jobs without one or whose trigger already passed.
    fn recompute_next_runs(&mut self, now: DateTime<Utc>) {
        for job in self.jobs.iter_mut() {
            if job.next_run.is_none_or(|nr| nr < now) {
                job.next_run = match CronSchedule::parse(&job.cron) {
                    Ok(schedule) => schedule.next_after(now, self.offset),
                    Err(e) => {
                        tracing::warn!("⚠️ Job '{}' has an unusable trigger: {e}", job.key);
                        None
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::JobKind;
    use crate::persistence::SchedulerDb;
    use chrono::Duration;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn open(id: i64) -> (JobKey, JobAction) {
        (
            JobKey::derive(JobKind::OpenGroup, Some(id)).unwrap(),
            JobAction::for_group(JobKind::OpenGroup, id),
        )
    }

    #[test]
    fn test_upsert_same_key_twice_keeps_second_trigger() {
        let mut engine = SchedulerEngine::in_memory(utc());
        let (key, action) = open(1);
        engine.upsert(key.clone(), "00 09 * * *", action.clone()).unwrap();
        engine.upsert(key.clone(), "00 10 * * *", action).unwrap();

        assert_eq!(engine.job_count(), 1);
        assert_eq!(engine.get(&key).unwrap().cron, "00 10 * * *");
    }

    #[test]
    fn test_upsert_rejects_bad_cron_without_mutation() {
        let mut engine = SchedulerEngine::in_memory(utc());
        let (key, action) = open(1);
        engine.upsert(key.clone(), "00 09 * * *", action.clone()).unwrap();
        assert!(engine.upsert(key.clone(), "99 09 * * *", action).is_err());
        assert_eq!(engine.get(&key).unwrap().cron, "00 09 * * *");
    }

    #[test]
    fn test_cancel_missing_key_is_noop() {
        let mut engine = SchedulerEngine::in_memory(utc());
        let key = JobKey::global(JobKind::CheckInactivity).unwrap();
        assert!(!engine.cancel(&key).unwrap());
    }

    #[test]
    fn test_tick_fires_once_and_advances() {
        let mut engine = SchedulerEngine::in_memory(utc());
        let (key, action) = open(3);
        engine.upsert(key.clone(), "*/5 * * * *", action).unwrap();

        let first_fire = engine.get(&key).unwrap().next_run.unwrap();
        let fired = engine.tick(first_fire);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].scheduled_for, first_fire);

        // Same instant again: already advanced, nothing due.
        assert!(engine.tick(first_fire).is_empty());
        let job = engine.get(&key).unwrap();
        assert_eq!(job.run_count, 1);
        assert!(job.next_run.unwrap() > first_fire);
    }

    #[test]
    fn test_tick_orders_by_trigger_then_registration() {
        let mut engine = SchedulerEngine::in_memory(utc());
        let (k1, a1) = open(1);
        let (k2, a2) = open(2);
        let sync = JobKey::global(JobKind::SyncGroups).unwrap();
        engine.upsert(k2.clone(), "00 10 * * *", a2).unwrap();
        engine.upsert(k1.clone(), "00 10 * * *", a1).unwrap();
        engine
            .upsert(sync.clone(), "00 09 * * *", JobAction::global(JobKind::SyncGroups))
            .unwrap();

        let later = Utc::now() + Duration::days(2);
        let fired: Vec<JobKey> = engine.tick(later).into_iter().map(|d| d.key).collect();
        assert_eq!(fired, vec![sync, k2, k1]);
    }

    #[test]
    fn test_reload_from_store() {
        let store = MemoryJobStore::new();
        {
            let mut engine = SchedulerEngine::new(Box::new(store.clone()), utc()).unwrap();
            let (key, action) = open(8);
            engine.upsert(key, "00 09 * * *", action).unwrap();
        }
        let engine = SchedulerEngine::new(Box::new(store), utc()).unwrap();
        assert_eq!(engine.job_count(), 1);
        assert!(engine.list_jobs()[0].next_run.is_some());
    }

    #[test]
    fn test_upsert_all_is_all_or_nothing() {
        let mut engine = SchedulerEngine::in_memory(utc());
        let (open_key, open_action) = open(2);
        engine.upsert(open_key.clone(), "00 09 * * *", open_action.clone()).unwrap();

        let close_key = JobKey::derive(JobKind::CloseGroup, Some(2)).unwrap();
        let err = engine.upsert_all(vec![
            (open_key.clone(), "00 07 * * *".into(), open_action),
            (close_key.clone(), "00 25 * * *".into(), JobAction::for_group(JobKind::CloseGroup, 2)),
        ]);
        assert!(err.is_err());
        assert_eq!(engine.get(&open_key).unwrap().cron, "00 09 * * *");
        assert!(engine.get(&close_key).is_none());
    }

    #[test]
    fn test_tick_sees_changes_from_another_engine() {
        let dir = std::env::temp_dir().join(format!("groupwarden-shared-jobs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobs.db");
        std::fs::remove_file(&path).ok();

        let (key, action) = open(1);
        let mut daemon =
            SchedulerEngine::new(Box::new(SchedulerDb::open(&path).unwrap()), utc()).unwrap();
        daemon.upsert(key.clone(), "00 09 * * *", action.clone()).unwrap();

        // A second process replaces the trigger.
        let mut cli =
            SchedulerEngine::new(Box::new(SchedulerDb::open(&path).unwrap()), utc()).unwrap();
        cli.upsert(key.clone(), "00 10 * * *", action).unwrap();

        let later = Utc::now() + Duration::days(2);
        let fired = daemon.tick(later);
        assert_eq!(fired.len(), 1);
        assert_eq!(daemon.get(&key).unwrap().cron, "00 10 * * *");

        // The daemon's run bookkeeping landed on the new trigger.
        let stored = SchedulerDb::open(&path).unwrap().load_all().unwrap();
        assert_eq!(stored[0].cron, "00 10 * * *");
        assert_eq!(stored[0].run_count, 1);

        // And then cancels it: the daemon must not fire it again.
        drop(cli);
        let mut cli =
            SchedulerEngine::new(Box::new(SchedulerDb::open(&path).unwrap()), utc()).unwrap();
        assert!(cli.cancel(&key).unwrap());
        assert!(daemon.tick(later + Duration::days(2)).is_empty());
        assert_eq!(daemon.job_count(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
