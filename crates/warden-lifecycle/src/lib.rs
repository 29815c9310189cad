//! # GroupWarden Lifecycle
//!
//! Everything that happens to a group over time.
//!
//! ```text
//!  ┌──────────┐  join event   ┌────────────────┐  flush   ┌─────────────┐
//!  │  Warden  │──────────────▶│ WelcomeBatcher │─────────▶│ WelcomeSink │
//!  └────┬─────┘               └────────────────┘          └─────────────┘
//!       │ boot / schedule
//!       ▼
//!  ┌───────────┐  due jobs  ┌────────────────┐  open/close/sync  ┌──────────────┐
//!  │ Scheduler │───────────▶│ DispatchWorker │──────────────────▶│ GroupService │
//!  └───────────┘            └───────┬────────┘                   └──────────────┘
//!                                   │ check-inactivity           ┌─────────────────┐
//!                                   └───────────────────────────▶│ InactivitySweep │
//!                                                                └─────────────────┘
//! ```

pub mod batcher;
pub mod handler;
pub mod jobs;
pub mod service;
pub mod sweep;
pub mod templates;
pub mod welcome;

#[cfg(test)]
pub(crate) mod test_support;

pub use batcher::{BatchSink, DebounceBatcher, RecordOutcome};
pub use handler::LifecycleHandler;
pub use service::{GroupService, SyncReport};
pub use sweep::{InactivitySweep, SweepReport};
pub use templates::Templates;
pub use welcome::{WelcomeBatcher, WelcomeSink};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_core::config::WardenConfig;
use warden_core::error::Result;
use warden_core::traits::{ConfigStore, GroupStore, MembershipStore, MessagingClient};
use warden_core::types::{GroupId, phone_from_jid};
use warden_scheduler::{
    DispatchWorker, LaneScheduler, RetryPolicy, SharedScheduler, offset_from_minutes,
};

/// Wires the stores, the messaging client and the scheduler together.
pub struct Warden {
    config: WardenConfig,
    scheduler: SharedScheduler,
    groups: Arc<dyn GroupStore>,
    service: Arc<GroupService>,
    sweep: Arc<InactivitySweep>,
    welcomes: WelcomeBatcher,
}

impl Warden {
    pub fn new<S>(
        config: WardenConfig,
        scheduler: SharedScheduler,
        store: Arc<S>,
        client: Arc<dyn MessagingClient>,
    ) -> Result<Self>
    where
        S: GroupStore + ConfigStore + MembershipStore + 'static,
    {
        let offset = offset_from_minutes(config.scheduler.utc_offset_minutes)?;
        let groups: Arc<dyn GroupStore> = store.clone();

        let service = Arc::new(GroupService::new(
            groups.clone(),
            client.clone(),
            scheduler.clone(),
            config.groups.clone(),
        ));
        let sweep = Arc::new(InactivitySweep::new(
            groups.clone(),
            store.clone(),
            store.clone(),
            client.clone(),
            config.inactivity.warn_batch_size,
            offset,
        ));
        let welcomes = WelcomeSink::new(groups.clone(), store, client, offset)
            .into_batcher(&config.welcome);

        Ok(Self {
            config,
            scheduler,
            groups,
            service,
            sweep,
            welcomes,
        })
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn service(&self) -> &GroupService {
        &self.service
    }

    /// Upsert the open/close jobs of one group.
    pub async fn schedule_entity_jobs(&self, id: GroupId, open_time: &str, close_time: &str) -> Result<()> {
        jobs::schedule_group_jobs(&self.scheduler, id, open_time, close_time).await
    }

    /// Remove the open/close jobs of one group. Returns how many existed.
    pub async fn cancel_entity_jobs(&self, id: GroupId) -> Result<usize> {
        jobs::cancel_group_jobs(&self.scheduler, id).await
    }

    /// Queue a welcome for `member_ref` (a JID or bare number) joining `id`.
    ///
    /// Returns `None` when welcomes are disabled.
    pub fn record_join_event(&self, id: GroupId, member_ref: &str) -> Option<RecordOutcome> {
        if !self.config.welcome.enabled {
            tracing::debug!("Welcome disabled, ignoring join of {} in group {}", member_ref, id);
            return None;
        }
        let phone = phone_from_jid(member_ref).to_string();
        Some(self.welcomes.record(id, phone))
    }

    pub async fn run_inactivity_sweep(&self) -> Result<SweepReport> {
        self.sweep.run().await
    }

    /// Platform sync followed by schedule reconciliation.
    pub async fn run_full_sync(&self) -> Result<SyncReport> {
        let report = self.service.sync_groups().await?;
        jobs::schedule_all_group_jobs(&self.scheduler, self.groups.as_ref()).await?;
        Ok(report)
    }

    /// Register the global jobs and reconcile every group's schedule.
    /// Returns the number of groups scheduled.
    pub async fn boot(&self) -> Result<usize> {
        jobs::register_global_jobs(&self.scheduler, &self.config).await?;
        let scheduled = jobs::schedule_all_group_jobs(&self.scheduler, self.groups.as_ref()).await?;
        tracing::info!(
            "🚀 Warden booted: {} job(s) registered",
            self.scheduler.lock().await.job_count()
        );
        Ok(scheduled)
    }

    pub fn handler(&self) -> Arc<LifecycleHandler> {
        Arc::new(LifecycleHandler::new(
            self.service.clone(),
            self.sweep.clone(),
            self.groups.clone(),
            self.scheduler.clone(),
        ))
    }

    /// Start the dispatch loop. It stops once `shutdown` turns `true`.
    pub fn spawn_worker(&self, shutdown: watch::Receiver<bool>) -> (Arc<DispatchWorker>, JoinHandle<()>) {
        let worker = Arc::new(DispatchWorker::new(
            self.scheduler.clone(),
            self.handler(),
            LaneScheduler::new(self.config.scheduler.group_lane_concurrency, 1),
            RetryPolicy::from(&self.config.scheduler.retry),
        ));
        let tick = Duration::from_secs(self.config.scheduler.tick_secs);
        let handle = warden_scheduler::spawn_worker(worker.clone(), tick, shutdown);
        (worker, handle)
    }

    /// Send every pending welcome now. Returns the number of batches flushed.
    pub async fn flush_welcomes(&self) -> usize {
        self.welcomes.flush_all().await
    }
}
