//! Dispatch worker — turns due jobs into handler calls.
//!
//! ```text
//! tick ──▶ SchedulerEngine::tick ──▶ in-flight guard ──▶ LaneScheduler
//!                                                           │
//!                          JobHandler::handle (retry) ◀─────┘
//! ```
//!
//! A job key stays in the in-flight set from the moment it is queued until
//! its handler returns, so one key never runs twice at the same time.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use warden_core::error::Result;

use crate::engine::SharedScheduler;
use crate::keys::JobKey;
use crate::lanes::{LaneScheduler, LaneTask};
use crate::tasks::{DueJob, RetryPolicy};

/// Executes one fired job. Bound once per process; dispatches on the action.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &DueJob) -> Result<()>;
}

/// Final result of one fire after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

/// Counters since the worker started.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    skipped: AtomicU64,
}

pub struct DispatchWorker {
    scheduler: SharedScheduler,
    handler: Arc<dyn JobHandler>,
    lanes: LaneScheduler,
    in_flight: Mutex<HashSet<JobKey>>,
    retry: RetryPolicy,
    wake: Notify,
    counters: Counters,
}

impl DispatchWorker {
    pub fn new(
        scheduler: SharedScheduler,
        handler: Arc<dyn JobHandler>,
        lanes: LaneScheduler,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            scheduler,
            handler,
            lanes,
            in_flight: Mutex::new(HashSet::new()),
            retry,
            wake: Notify::new(),
            counters: Counters::default(),
        }
    }

    /// Collect jobs due at `now` and queue them. Returns how many were queued.
    pub async fn enqueue_due(&self, now: DateTime<Utc>) -> usize {
        let due = self.scheduler.lock().await.tick(now);
        let mut queued = 0;
        for job in due {
            if !self.claim(&job.key) {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "⏭️ Job '{}' ({}) still running, skipping this fire",
                    job.key,
                    job.action.name()
                );
                continue;
            }
            self.lanes.submit(LaneTask::new(job)).await;
            queued += 1;
        }
        queued
    }

    /// Start every queued task that has a free lane slot.
    pub async fn pump(self: &Arc<Self>) {
        while let Some(task) = self.lanes.next().await {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            let worker = Arc::clone(self);
            tokio::spawn(async move {
                let inner = Arc::clone(&worker);
                let job = task.job.clone();
                // Inner task so a panicking handler only fails its own job.
                let outcome = match tokio::spawn(async move { inner.run_job(&job).await }).await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(
                            "💥 Job '{}' ({}) handler panicked: {e}",
                            task.job.key,
                            task.job.action.name()
                        );
                        JobOutcome::Failed {
                            attempts: 1,
                            error: format!("handler panicked: {e}"),
                        }
                    }
                };
                worker.finish(&task, &outcome).await;
            });
        }
    }

    /// Run the handler for one job, retrying transient errors with backoff.
    pub async fn run_job(&self, job: &DueJob) -> JobOutcome {
        let mut attempt = 1;
        loop {
            match self.handler.handle(job).await {
                Ok(()) => {
                    tracing::info!(
                        "✅ Job '{}' ({}) done (attempt {attempt})",
                        job.key,
                        job.action.name()
                    );
                    return JobOutcome::Succeeded { attempts: attempt };
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "🔄 Job '{}' ({}) attempt {attempt} failed: {e} (retry in {:?})",
                        job.key,
                        job.action.name(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Job '{}' ({}) failed after {attempt} attempt(s): {e}",
                        job.key,
                        job.action.name()
                    );
                    return JobOutcome::Failed {
                        attempts: attempt,
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    /// Main loop: poll the scheduler every `tick` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("⏱️ Dispatch worker started (tick {:?})", tick);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.enqueue_due(Utc::now()).await;
                    self.pump().await;
                }
                _ = self.wake.notified() => {
                    self.pump().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("🛑 Dispatch worker stopping, draining in-flight jobs");
        self.drain().await;
        let stats = self.stats();
        tracing::info!(
            "🛑 Dispatch worker stopped ({} ok, {} failed, {} skipped)",
            stats.succeeded,
            stats.failed,
            stats.skipped
        );
    }

    /// Wait until nothing is queued or running.
    pub async fn drain(self: &Arc<Self>) {
        loop {
            self.pump().await;
            if self.lanes.total_pending().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn is_in_flight(&self, key: &JobKey) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }

    pub fn lanes(&self) -> &LaneScheduler {
        &self.lanes
    }

    fn claim(&self, key: &JobKey) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(key.clone()),
            Err(poisoned) => poisoned.into_inner().insert(key.clone()),
        }
    }

    fn release(&self, key: &JobKey) {
        match self.in_flight.lock() {
            Ok(mut set) => set.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }

    async fn finish(&self, task: &LaneTask, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Succeeded { .. } => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            JobOutcome::Failed { .. } => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.release(&task.job.key);
        self.lanes.complete(task.lane).await;
        self.wake.notify_one();
    }
}

/// Spawn the worker loop on the runtime.
pub fn spawn_worker(
    worker: Arc<DispatchWorker>,
    tick: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(worker.run(tick, shutdown))
}
