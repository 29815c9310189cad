//! Binds job actions to the services that carry them out.

use std::sync::Arc;

use async_trait::async_trait;
use warden_core::error::{Result, WardenError};
use warden_core::traits::GroupStore;
use warden_scheduler::{DueJob, JobHandler, JobKind, SharedScheduler};

use crate::jobs;
use crate::service::GroupService;
use crate::sweep::InactivitySweep;

pub struct LifecycleHandler {
    service: Arc<GroupService>,
    sweep: Arc<InactivitySweep>,
    groups: Arc<dyn GroupStore>,
    scheduler: SharedScheduler,
}

impl LifecycleHandler {
    pub fn new(
        service: Arc<GroupService>,
        sweep: Arc<InactivitySweep>,
        groups: Arc<dyn GroupStore>,
        scheduler: SharedScheduler,
    ) -> Self {
        Self {
            service,
            sweep,
            groups,
            scheduler,
        }
    }
}

#[async_trait]
impl JobHandler for LifecycleHandler {
    async fn handle(&self, job: &DueJob) -> Result<()> {
        let group_id = || {
            job.action.payload.group_id.ok_or_else(|| {
                WardenError::Validation(format!("Job '{}' has no groupId in its payload", job.key))
            })
        };

        match job.action.kind {
            JobKind::OpenGroup => {
                self.service.open_group(group_id()?).await?;
            }
            JobKind::CloseGroup => {
                self.service.close_group(group_id()?).await?;
            }
            JobKind::SyncGroups => {
                self.service.sync_groups().await?;
                // Groups created by the sync get their default schedule.
                jobs::schedule_all_group_jobs(&self.scheduler, self.groups.as_ref()).await?;
            }
            JobKind::CheckInactivity => {
                self.sweep.run().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeStore, RecordingClient, utc};
    use chrono::Utc;
    use warden_core::config::GroupDefaultsConfig;
    use warden_scheduler::{JobAction, JobKey, SchedulerEngine};

    fn handler(store: &Arc<FakeStore>, client: &Arc<RecordingClient>) -> (LifecycleHandler, SharedScheduler) {
        let scheduler = SchedulerEngine::in_memory(utc()).shared();
        let service = Arc::new(GroupService::new(
            store.clone(),
            client.clone(),
            scheduler.clone(),
            GroupDefaultsConfig::default(),
        ));
        let sweep = Arc::new(InactivitySweep::new(
            store.clone(),
            store.clone(),
            store.clone(),
            client.clone(),
            10,
            utc(),
        ));
        (
            LifecycleHandler::new(service, sweep, store.clone(), scheduler.clone()),
            scheduler,
        )
    }

    fn due(key: &str, action: JobAction) -> DueJob {
        DueJob {
            key: JobKey::from_stored(key),
            action,
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_and_close_dispatch() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(4, "g4@g.us", "G4");
        let (h, _) = handler(&store, &client);

        h.handle(&due("close:4", JobAction::for_group(JobKind::CloseGroup, 4)))
            .await
            .unwrap();
        assert!(store.group(4).unwrap().is_closed);
        h.handle(&due("open:4", JobAction::for_group(JobKind::OpenGroup, 4)))
            .await
            .unwrap();
        assert!(!store.group(4).unwrap().is_closed);
    }

    #[tokio::test]
    async fn test_missing_group_id_is_terminal() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        let (h, _) = handler(&store, &client);

        let err = h
            .handle(&due("open:4", JobAction::global(JobKind::OpenGroup)))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Validation(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_sync_schedules_new_groups() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        client.add_remote_group("n@g.us", "New", vec![]);
        let (h, scheduler) = handler(&store, &client);

        h.handle(&due("sync-groups", JobAction::global(JobKind::SyncGroups)))
            .await
            .unwrap();
        assert_eq!(store.groups().len(), 1);
        assert_eq!(scheduler.lock().await.job_count(), 2);
    }
}
