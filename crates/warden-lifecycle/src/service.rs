//! Group operations: open/close, schedule changes and platform sync.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use warden_core::config::GroupDefaultsConfig;
use warden_core::error::{Result, WardenError};
use warden_core::traits::{GroupStore, MessagingClient};
use warden_core::types::{Group, GroupId, GroupPatch, MemberUpsert, Participant, RemoteGroup};
use warden_scheduler::{SharedScheduler, validate_time};

use crate::jobs;

/// Totals for one platform sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub groups_seen: usize,
    pub groups_created: usize,
    pub groups_renamed: usize,
    pub groups_failed: usize,
    pub members_synced: usize,
    pub members_failed: usize,
}

pub struct GroupService {
    groups: Arc<dyn GroupStore>,
    client: Arc<dyn MessagingClient>,
    scheduler: SharedScheduler,
    defaults: GroupDefaultsConfig,
}

impl GroupService {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        client: Arc<dyn MessagingClient>,
        scheduler: SharedScheduler,
        defaults: GroupDefaultsConfig,
    ) -> Self {
        Self {
            groups,
            client,
            scheduler,
            defaults,
        }
    }

    /// Let every participant post.
    pub async fn open_group(&self, id: GroupId) -> Result<Group> {
        let group = self.groups.get_by_id(id).await?;
        self.client.open_group(&group.whatsapp_id).await?;
        let group = self.groups.update_settings(id, GroupPatch::closed(false)).await?;
        tracing::info!("🔓 Group {} ('{}') opened", group.id, group.name);
        Ok(group)
    }

    /// Restrict posting to admins.
    pub async fn close_group(&self, id: GroupId) -> Result<Group> {
        let group = self.groups.get_by_id(id).await?;
        self.client.close_group(&group.whatsapp_id).await?;
        let group = self.groups.update_settings(id, GroupPatch::closed(true)).await?;
        tracing::info!("🔒 Group {} ('{}') closed", group.id, group.name);
        Ok(group)
    }

    /// Persist new open/close times and replace the group's jobs in place.
    pub async fn change_open_close_times(
        &self,
        id: GroupId,
        open_time: &str,
        close_time: &str,
    ) -> Result<Group> {
        if id <= 0 {
            return Err(WardenError::Validation(format!("Group ID is required (got {id})")));
        }
        validate_time(open_time)?;
        validate_time(close_time)?;

        let group = self
            .groups
            .update_settings(id, GroupPatch::times(open_time, close_time))
            .await?;
        jobs::schedule_group_jobs(&self.scheduler, id, open_time, close_time).await?;
        Ok(group)
    }

    /// Mirror the platform's groups and participants into the store.
    ///
    /// New groups get the configured default times. Fails only if the
    /// platform's group list cannot be fetched.
    pub async fn sync_groups(&self) -> Result<SyncReport> {
        let remote = self.client.find_groups().await?;
        tracing::info!("🔄 Syncing {} group(s) from the platform", remote.len());

        let mut report = SyncReport {
            groups_seen: remote.len(),
            ..Default::default()
        };
        for group in &remote {
            if let Err(e) = self.sync_group(group, &mut report).await {
                report.groups_failed += 1;
                tracing::error!("❌ Sync failed for {} ('{}'): {e}", group.whatsapp_id, group.name);
            }
        }

        tracing::info!(
            "🔄 Sync done: {} seen, {} created, {} renamed, {} failed, {} member(s)",
            report.groups_seen,
            report.groups_created,
            report.groups_renamed,
            report.groups_failed,
            report.members_synced
        );
        Ok(report)
    }

    async fn sync_group(&self, remote: &RemoteGroup, report: &mut SyncReport) -> Result<()> {
        let participants = self.client.find_participants(&remote.whatsapp_id).await?;
        if !participants.iter().any(|p| p.role.is_owner()) {
            tracing::info!("Group {} has no owner, syncing without one", remote.whatsapp_id);
        }

        let group = match self.groups.get_by_whatsapp_id(&remote.whatsapp_id).await {
            Ok(existing) if existing.name != remote.name => {
                tracing::info!(
                    "✏️ Group {} renamed: '{}' → '{}'",
                    existing.id,
                    existing.name,
                    remote.name
                );
                report.groups_renamed += 1;
                self.groups
                    .update_settings(existing.id, GroupPatch::renamed(&remote.name))
                    .await?
            }
            Ok(existing) => existing,
            Err(WardenError::NotFound(..)) => {
                let created = self
                    .groups
                    .create_group(
                        &remote.name,
                        &remote.whatsapp_id,
                        self.defaults.default_open_time.as_deref(),
                        self.defaults.default_close_time.as_deref(),
                    )
                    .await?;
                tracing::info!("➕ Group {} created for {}", created.id, remote.whatsapp_id);
                report.groups_created += 1;
                created
            }
            Err(e) => return Err(e),
        };

        let results = join_all(participants.iter().map(|p| self.sync_participant(&group, p))).await;
        for result in results {
            match result {
                Ok(()) => report.members_synced += 1,
                Err(e) => {
                    report.members_failed += 1;
                    tracing::warn!("Participant sync failed in group {}: {e}", group.id);
                }
            }
        }
        tracing::debug!(
            "Synced group {} with {} participant(s)",
            group.id,
            participants.len()
        );
        Ok(())
    }

    async fn sync_participant(&self, group: &Group, participant: &Participant) -> Result<()> {
        let member_id = self
            .groups
            .upsert_member(MemberUpsert::from_jid(
                &participant.whatsapp_id,
                participant.lid.clone(),
            ))
            .await?;
        self.groups
            .upsert_membership(
                member_id,
                group.id,
                participant.role.is_owner(),
                participant.role.is_admin(),
            )
            .await
    }
}
