//! Registration of recurring jobs: per-group open/close and the global
//! sync and inactivity jobs.

use warden_core::config::WardenConfig;
use warden_core::error::Result;
use warden_core::traits::GroupStore;
use warden_core::types::GroupId;
use warden_scheduler::{JobAction, JobKey, JobKind, SharedScheduler, time_to_cron};

/// Upsert `open:<id>` and `close:<id>` together.
///
/// Both times are validated before the scheduler is touched and the pair is
/// written as one unit, so a failure leaves any existing jobs in place.
pub async fn schedule_group_jobs(
    scheduler: &SharedScheduler,
    group_id: GroupId,
    open_time: &str,
    close_time: &str,
) -> Result<()> {
    let (open_key, close_key) = JobKey::group_pair(group_id)?;
    let open_cron = time_to_cron(open_time)?;
    let close_cron = time_to_cron(close_time)?;

    scheduler.lock().await.upsert_all(vec![
        (open_key, open_cron, JobAction::for_group(JobKind::OpenGroup, group_id)),
        (close_key, close_cron, JobAction::for_group(JobKind::CloseGroup, group_id)),
    ])?;
    tracing::info!(
        "⏰ Group {} scheduled: open {} / close {}",
        group_id,
        open_time,
        close_time
    );
    Ok(())
}

/// Remove both group jobs. Returns how many existed.
pub async fn cancel_group_jobs(scheduler: &SharedScheduler, group_id: GroupId) -> Result<usize> {
    let (open_key, close_key) = JobKey::group_pair(group_id)?;
    let mut engine = scheduler.lock().await;
    let mut removed = 0;
    for key in [open_key, close_key] {
        if engine.cancel(&key)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Boot reconciliation: upsert jobs for every group with both times set.
///
/// A group with a malformed stored time is logged and skipped. Returns the
/// number of groups scheduled.
pub async fn schedule_all_group_jobs(
    scheduler: &SharedScheduler,
    groups: &dyn GroupStore,
) -> Result<usize> {
    let groups = groups.list_with_both_times_set().await?;
    let mut scheduled = 0;
    for group in &groups {
        let Some((open, close)) = group.schedule() else {
            continue;
        };
        match schedule_group_jobs(scheduler, group.id, open, close).await {
            Ok(()) => scheduled += 1,
            Err(e) => tracing::error!("Failed to schedule group {} ('{}'): {e}", group.id, group.name),
        }
    }
    tracing::info!("📅 Scheduled jobs for {}/{} group(s)", scheduled, groups.len());
    Ok(scheduled)
}

/// Upsert `sync-groups` and `check-inactivity`.
///
/// With the sweep disabled, a previously registered `check-inactivity` job
/// is cancelled instead.
pub async fn register_global_jobs(scheduler: &SharedScheduler, config: &WardenConfig) -> Result<()> {
    let mut engine = scheduler.lock().await;
    engine.upsert(
        JobKey::global(JobKind::SyncGroups)?,
        &config.scheduler.sync_cron,
        JobAction::global(JobKind::SyncGroups),
    )?;

    let inactivity_key = JobKey::global(JobKind::CheckInactivity)?;
    if config.inactivity.enabled {
        engine.upsert(
            inactivity_key,
            &config.inactivity.cron,
            JobAction::global(JobKind::CheckInactivity),
        )?;
    } else {
        engine.cancel(&inactivity_key)?;
    }
    Ok(())
}
