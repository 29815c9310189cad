//! Lane-based dispatch queues — per-group jobs and maintenance jobs run in
//! separate lanes so a long sweep never starves an open/close.
//!
//! Group lane: open/close jobs, several at once.
//! Maintenance lane: sync and inactivity sweeps, one at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::keys::JobKind;
use crate::tasks::DueJob;

/// Dispatch lane — determines priority and concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Lane {
    /// Per-group open/close — highest priority.
    Group,
    /// Global sync and inactivity sweeps.
    Maintenance,
}

impl Lane {
    const ALL: [Lane; 2] = [Lane::Group, Lane::Maintenance];

    /// Priority order (lower = higher priority).
    pub fn priority(&self) -> u8 {
        match self {
            Lane::Group => 0,
            Lane::Maintenance => 1,
        }
    }

    pub fn for_kind(kind: JobKind) -> Self {
        if kind.is_per_group() {
            Lane::Group
        } else {
            Lane::Maintenance
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Group => write!(f, "group"),
            Lane::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// A due job queued for execution.
#[derive(Debug, Clone)]
pub struct LaneTask {
    pub job: DueJob,
    pub lane: Lane,
    /// When this task was queued.
    pub queued_at: chrono::DateTime<chrono::Utc>,
}

impl LaneTask {
    pub fn new(job: DueJob) -> Self {
        Self {
            lane: Lane::for_kind(job.action.kind),
            job,
            queued_at: chrono::Utc::now(),
        }
    }
}

/// Per-lane state.
struct LaneState {
    queue: VecDeque<LaneTask>,
    active: usize,
    max_concurrent: usize,
    total_processed: u64,
}

impl LaneState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            active: 0,
            max_concurrent: max_concurrent.max(1),
            total_processed: 0,
        }
    }

    fn can_run(&self) -> bool {
        self.active < self.max_concurrent && !self.queue.is_empty()
    }

    fn dequeue(&mut self) -> Option<LaneTask> {
        if self.active < self.max_concurrent {
            let task = self.queue.pop_front()?;
            self.active += 1;
            Some(task)
        } else {
            None
        }
    }

    fn complete(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.total_processed += 1;
    }
}

/// Lane scheduler — FIFO within a lane, lanes checked in priority order.
pub struct LaneScheduler {
    lanes: [Arc<Mutex<LaneState>>; 2],
}

impl LaneScheduler {
    pub fn new(group_limit: usize, maintenance_limit: usize) -> Self {
        Self {
            lanes: [
                Arc::new(Mutex::new(LaneState::new(group_limit))),
                Arc::new(Mutex::new(LaneState::new(maintenance_limit))),
            ],
        }
    }

    /// Submit a task to its lane.
    pub async fn submit(&self, task: LaneTask) {
        let idx = task.lane.priority() as usize;
        let mut lane = self.lanes[idx].lock().await;
        tracing::debug!(
            "📥 Lane[{}] enqueue: {} (queue: {}, active: {})",
            task.lane,
            task.job.key,
            lane.queue.len(),
            lane.active
        );
        lane.queue.push_back(task);
    }

    /// Pop the next task to execute, respecting lane priorities.
    /// Returns None if nothing is queued or every lane with work is at capacity.
    pub async fn next(&self) -> Option<LaneTask> {
        for lane in &self.lanes {
            let mut state = lane.lock().await;
            if state.can_run() {
                return state.dequeue();
            }
        }
        None
    }

    /// Mark a lane task as complete (frees a concurrency slot).
    pub async fn complete(&self, lane: Lane) {
        let idx = lane.priority() as usize;
        self.lanes[idx].lock().await.complete();
    }

    pub async fn stats(&self) -> Vec<LaneStats> {
        let mut result = Vec::with_capacity(Lane::ALL.len());
        for lane in Lane::ALL {
            let state = self.lanes[lane.priority() as usize].lock().await;
            result.push(LaneStats {
                lane,
                queued: state.queue.len(),
                active: state.active,
                max_concurrent: state.max_concurrent,
                total_processed: state.total_processed,
            });
        }
        result
    }

    /// Queued plus running tasks across all lanes.
    pub async fn total_pending(&self) -> usize {
        let mut total = 0;
        for lane in &self.lanes {
            let state = lane.lock().await;
            total += state.queue.len() + state.active;
        }
        total
    }
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::new(4, 1)
    }
}

/// Statistics for a single lane.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LaneStats {
    pub lane: Lane,
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
}
