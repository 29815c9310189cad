//! Inactivity sweep — ban long-silent members, warn the merely quiet.
//!
//! Per group, ban runs before warn and every member removed by the ban step
//! is left out of the warnings. A group that fails is logged and counted;
//! the sweep moves on to the next one.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::FixedOffset;
use serde::Serialize;
use warden_core::error::Result;
use warden_core::traits::{ConfigStore, GroupStore, MembershipStore, MessagingClient};
use warden_core::types::{Group, GroupId, InactiveMember, MemberId};

use crate::templates::Templates;

pub const WARNING_DAYS_KEY: &str = "inactive_warning_days";
pub const BAN_DAYS_KEY: &str = "inactive_ban_days";

/// Totals for one sweep over every group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub groups_checked: usize,
    /// Both thresholds disabled.
    pub groups_skipped: usize,
    pub groups_failed: usize,
    pub members_banned: usize,
    pub members_warned: usize,
    pub warn_batches_failed: usize,
    pub summaries_failed: usize,
    /// Removed on the platform but the membership row could not be updated.
    pub removals_unrecorded: usize,
}

/// Parse a day threshold. Anything that is not a non-negative integer is 0.
pub fn parse_days(raw: &str) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(days) if days >= 0 => u32::try_from(days).unwrap_or(u32::MAX),
        _ => {
            tracing::warn!("Invalid inactivity threshold '{}', treating as disabled", raw);
            0
        }
    }
}

pub struct InactivitySweep {
    groups: Arc<dyn GroupStore>,
    config: Arc<dyn ConfigStore>,
    memberships: Arc<dyn MembershipStore>,
    client: Arc<dyn MessagingClient>,
    warn_batch_size: usize,
    offset: FixedOffset,
}

impl InactivitySweep {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        config: Arc<dyn ConfigStore>,
        memberships: Arc<dyn MembershipStore>,
        client: Arc<dyn MessagingClient>,
        warn_batch_size: usize,
        offset: FixedOffset,
    ) -> Self {
        Self {
            groups,
            config,
            memberships,
            client,
            warn_batch_size: warn_batch_size.max(1),
            offset,
        }
    }

    /// Sweep every group. Fails only if the group list itself cannot be read.
    pub async fn run(&self) -> Result<SweepReport> {
        let groups = self.groups.list_all().await?;
        tracing::info!("🧹 Inactivity sweep over {} group(s)", groups.len());

        let mut report = SweepReport::default();
        for group in &groups {
            match self.sweep_group(group, &mut report).await {
                Ok(true) => report.groups_checked += 1,
                Ok(false) => report.groups_skipped += 1,
                Err(e) => {
                    report.groups_failed += 1;
                    tracing::error!(
                        "❌ Inactivity check failed for group {} ('{}'): {e}",
                        group.id,
                        group.name
                    );
                }
            }
        }

        tracing::info!(
            "🧹 Sweep done: {} checked, {} skipped, {} failed, {} banned, {} warned",
            report.groups_checked,
            report.groups_skipped,
            report.groups_failed,
            report.members_banned,
            report.members_warned
        );
        Ok(report)
    }

    async fn threshold(&self, group_id: GroupId, key: &str) -> Result<u32> {
        let raw = self.config.get_with_default(group_id, key, "0").await?;
        Ok(parse_days(&raw))
    }

    /// Returns `false` when both checks are disabled for the group.
    async fn sweep_group(&self, group: &Group, report: &mut SweepReport) -> Result<bool> {
        let warn_days = self.threshold(group.id, WARNING_DAYS_KEY).await?;
        let ban_days = self.threshold(group.id, BAN_DAYS_KEY).await?;
        if warn_days == 0 && ban_days == 0 {
            tracing::debug!("Group {} has inactivity checks disabled", group.id);
            return Ok(false);
        }

        let templates =
            Templates::with_overrides(self.config.templates(group.id).await?, self.offset);

        let mut banned: HashSet<MemberId> = HashSet::new();
        if ban_days > 0 {
            let to_ban = self.memberships.list_inactive_since(group.id, ban_days).await?;
            if !to_ban.is_empty() {
                self.ban(group, ban_days, &to_ban, &templates, report).await?;
                banned = to_ban.iter().map(|m| m.member_id).collect();
            }
        }

        if warn_days > 0 {
            let to_warn: Vec<InactiveMember> = self
                .memberships
                .list_inactive_since(group.id, warn_days)
                .await?
                .into_iter()
                .filter(|m| !banned.contains(&m.member_id))
                .collect();
            self.warn(group, warn_days, &to_warn, &templates, report).await;
        }
        Ok(true)
    }

    /// One bulk removal; its failure aborts the group's cycle.
    async fn ban(
        &self,
        group: &Group,
        days: u32,
        members: &[InactiveMember],
        templates: &Templates,
        report: &mut SweepReport,
    ) -> Result<()> {
        let numbers: Vec<String> = members.iter().map(|m| m.whatsapp_number.clone()).collect();
        self.client.bulk_remove(&group.whatsapp_id, &numbers).await?;
        report.members_banned += members.len();
        tracing::info!(
            "🚫 Removed {} inactive member(s) from group {} ({}+ days)",
            members.len(),
            group.id,
            days
        );

        let summary = templates.ban_summary(days, members);
        if let Err(e) = self.client.send_message(&group.whatsapp_id, &summary).await {
            report.summaries_failed += 1;
            tracing::warn!("Ban summary for group {} not sent: {e}", group.id);
        }

        for member in members {
            if let Err(e) = self.memberships.mark_removed(group.id, member.member_id).await {
                report.removals_unrecorded += 1;
                tracing::error!(
                    "Member {} removed from group {} but not marked: {e}",
                    member.member_id,
                    group.id
                );
            }
        }
        Ok(())
    }

    async fn warn(
        &self,
        group: &Group,
        days: u32,
        members: &[InactiveMember],
        templates: &Templates,
        report: &mut SweepReport,
    ) {
        for chunk in members.chunks(self.warn_batch_size) {
            let text = templates.inactivity_warning(days, chunk);
            match self.client.send_message(&group.whatsapp_id, &text).await {
                Ok(()) => report.members_warned += chunk.len(),
                Err(e) => {
                    report.warn_batches_failed += 1;
                    tracing::warn!(
                        "Inactivity warning ({} member(s)) for group {} not sent: {e}",
                        chunk.len(),
                        group.id
                    );
                }
            }
        }
        if !members.is_empty() {
            tracing::info!("⚠️ Warned {} inactive member(s) in group {}", members.len(), group.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeStore, RecordingClient, utc};

    fn sweep(store: &Arc<FakeStore>, client: &Arc<RecordingClient>, batch: usize) -> InactivitySweep {
        InactivitySweep::new(
            store.clone(),
            store.clone(),
            store.clone(),
            client.clone(),
            batch,
            utc(),
        )
    }

    fn thresholds(store: &FakeStore, group: GroupId, warn: &str, ban: &str) {
        store.set_sync(group, WARNING_DAYS_KEY, warn);
        store.set_sync(group, BAN_DAYS_KEY, ban);
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(parse_days("7"), 7);
        assert_eq!(parse_days(" 30 "), 30);
        assert_eq!(parse_days("0"), 0);
        assert_eq!(parse_days("-3"), 0);
        assert_eq!(parse_days("abc"), 0);
        assert_eq!(parse_days(""), 0);
    }

    #[tokio::test]
    async fn test_ban_precedes_warn() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "5", "2");
        store.add_member(1, 10, "5510", Some(10), 40);
        store.add_member(1, 11, "5511", Some(1), 40);

        let report = sweep(&store, &client, 10).run().await.unwrap();

        // Inactive 10 days exceeds both thresholds: banned, never warned.
        assert_eq!(client.removed(), vec![("g1@g.us".into(), vec!["5510".into()])]);
        assert_eq!(store.removed(), vec![(1, 10)]);
        assert_eq!(report.members_banned, 1);
        assert_eq!(report.members_warned, 0);
        let sent = client.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("removed for inactivity"));
    }

    #[tokio::test]
    async fn test_warned_between_thresholds() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "5", "30");
        store.add_member(1, 10, "5510", Some(6), 60);
        store.add_member(1, 11, "5511", None, 45);

        let report = sweep(&store, &client, 10).run().await.unwrap();

        assert_eq!(report.members_banned, 1);
        assert_eq!(report.members_warned, 1);
        let sent = client.sent();
        // Ban summary labels the never-spoke member by join date.
        assert!(sent[0].1.contains("@5511 - Joined:"));
        assert!(sent[1].1.contains("@5510 - Last message:"));
        assert!(!sent[1].1.contains("5511"));
    }

    #[tokio::test]
    async fn test_warn_above_ban_warns_nobody() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "10", "3");
        store.add_member(1, 10, "5510", Some(12), 60);
        store.add_member(1, 11, "5511", Some(5), 60);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.members_banned, 2);
        assert_eq!(report.members_warned, 0);
        assert_eq!(client.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_failure_isolated_per_group() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "x@g.us", "X");
        store.add_group(2, "y@g.us", "Y");
        thresholds(&store, 0, "5", "2");
        store.add_member(1, 10, "5510", Some(10), 60);
        store.add_member(1, 11, "5511", Some(6), 60);
        store.add_member(2, 20, "5520", Some(10), 60);
        client.fail_remove_in("x@g.us");

        let report = sweep(&store, &client, 10).run().await.unwrap();

        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.groups_checked, 1);
        // Group X: no summary, no warning, nothing marked removed.
        assert!(client.sent().iter().all(|(to, _)| to == "y@g.us"));
        assert_eq!(store.removed(), vec![(2, 20)]);
        assert_eq!(client.removed(), vec![("y@g.us".into(), vec!["5520".into()])]);
    }

    #[tokio::test]
    async fn test_disabled_group_runs_no_queries() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        store.add_member(1, 10, "5510", Some(100), 200);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.groups_skipped, 1);
        assert_eq!(store.inactivity_queries(), 0);
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_threshold_treated_as_zero() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "soon", "2");
        store.add_member(1, 10, "5510", Some(3), 60);
        store.add_member(1, 11, "5511", Some(1), 60);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.members_banned, 1);
        // Only the ban listing ran.
        assert_eq!(store.inactivity_queries(), 1);
    }

    #[tokio::test]
    async fn test_mark_removed_failure_isolated_per_member() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "0", "2");
        store.add_member(1, 10, "5510", Some(10), 60);
        store.add_member(1, 11, "5511", Some(9), 60);
        store.add_member(1, 12, "5512", Some(8), 60);
        store.fail_mark_removed_for(11);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.members_banned, 3);
        assert_eq!(report.removals_unrecorded, 1);
        assert_eq!(store.removed(), vec![(1, 10), (1, 12)]);
        assert_eq!(report.groups_failed, 0);
    }

    #[tokio::test]
    async fn test_summary_failure_still_marks_removed() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "0", "2");
        store.add_member(1, 10, "5510", Some(10), 60);
        client.fail_send_to("g1@g.us");

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.summaries_failed, 1);
        assert_eq!(store.removed(), vec![(1, 10)]);
    }

    #[tokio::test]
    async fn test_warnings_chunked_with_failure_isolation() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        thresholds(&store, 1, "5", "0");
        for i in 0..25 {
            store.add_member(1, 100 + i, &format!("55{i:02}"), Some(6 + i), 90);
        }
        client.fail_send_call(1);

        let report = sweep(&store, &client, 10).run().await.unwrap();

        // 25 members in chunks of 10: 10, 10, 5; the middle one fails.
        assert_eq!(report.warn_batches_failed, 1);
        assert_eq!(report.members_warned, 15);
        let sent = client.sent();
        assert_eq!(sent.len(), 2);
        // Oldest activity first: member 124 (30 days) leads the first chunk.
        assert!(sent[0].1.lines().nth(1).unwrap().starts_with("@5524"));
        assert_eq!(sent[1].1.lines().count(), 5 + 2);
    }

    #[tokio::test]
    async fn test_listing_failure_counts_group_failed() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        store.add_group(2, "g2@g.us", "G2");
        thresholds(&store, 0, "5", "0");
        store.add_member(2, 20, "5520", Some(6), 60);
        store.fail_listing_for(1);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.members_warned, 1);
    }

    #[tokio::test]
    async fn test_config_failure_counts_group_failed() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "g1@g.us", "G1");
        store.fail_config_for(1);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.groups_failed, 1);
        assert_eq!(store.inactivity_queries(), 0);
    }

    #[tokio::test]
    async fn test_huge_threshold_isolated_per_group() {
        let store = Arc::new(FakeStore::new());
        let client = Arc::new(RecordingClient::new());
        store.add_group(1, "x@g.us", "X");
        store.add_group(2, "y@g.us", "Y");
        thresholds(&store, 1, "0", "100000000");
        thresholds(&store, 2, "0", "2");
        store.add_member(1, 10, "5510", Some(10), 60);
        store.add_member(2, 20, "5520", Some(10), 60);

        let report = sweep(&store, &client, 10).run().await.unwrap();
        assert_eq!(report.groups_failed, 1);
        assert_eq!(report.groups_checked, 1);
        assert_eq!(client.removed(), vec![("y@g.us".into(), vec!["5520".into()])]);
        assert_eq!(store.removed(), vec![(2, 20)]);
    }
}
