//! # GroupWarden Scheduler
//!
//! Persistent recurring jobs keyed by `(action, group)` and the worker that
//! executes them.
//!
//! ## Design Principles
//! - No external queue (no Redis): SQLite persistence, survives restarts
//! - One job per key: scheduling the same group again replaces its trigger
//! - Tokio timers only, zero overhead when idle
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (Arc<Mutex>)
//!   ├── open:7            "00 09 * * *" → open-group {groupId: 7}
//!   ├── close:7           "00 17 * * *" → close-group {groupId: 7}
//!   ├── sync-groups       "0 */6 * * *"
//!   └── check-inactivity  "0 12 * * *"
//!
//! DispatchWorker (tokio interval)
//!   ├── tick → due jobs in trigger order
//!   ├── LaneScheduler: group lane (4) / maintenance lane (1)
//!   └── JobHandler::handle with retry on transient errors
//! ```

pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod keys;
pub mod lanes;
pub mod persistence;
pub mod store;
pub mod tasks;

pub use cron::{CronSchedule, offset_from_minutes, time_to_cron, validate_time};
pub use dispatch::{DispatchStats, DispatchWorker, JobHandler, JobOutcome, spawn_worker};
pub use engine::{SchedulerEngine, SharedScheduler};
pub use keys::{JobKey, JobKind};
pub use lanes::{Lane, LaneScheduler, LaneStats, LaneTask};
pub use persistence::SchedulerDb;
pub use store::{JobStore, MemoryJobStore};
pub use tasks::{DueJob, Job, JobAction, JobPayload, RetryPolicy};
