//! Persistence traits for groups, per-group config and memberships.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Group, GroupId, GroupPatch, InactiveMember, MemberId, MemberUpsert};

/// Group records.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn get_by_id(&self, id: GroupId) -> Result<Group>;

    async fn get_by_whatsapp_id(&self, whatsapp_id: &str) -> Result<Group>;

    /// Apply a partial update and return the updated record.
    async fn update_settings(&self, id: GroupId, patch: GroupPatch) -> Result<Group>;

    async fn list_all(&self) -> Result<Vec<Group>>;

    /// Groups with both `open_time` and `close_time` set.
    async fn list_with_both_times_set(&self) -> Result<Vec<Group>>;

    async fn create_group(
        &self,
        name: &str,
        whatsapp_id: &str,
        open_time: Option<&str>,
        close_time: Option<&str>,
    ) -> Result<Group>;

    /// Insert or refresh a member, returning its id.
    async fn upsert_member(&self, member: MemberUpsert) -> Result<MemberId>;

    /// Insert or refresh a membership. Re-activates a removed membership.
    async fn upsert_membership(
        &self,
        member_id: MemberId,
        group_id: GroupId,
        is_owner: bool,
        is_admin: bool,
    ) -> Result<()>;
}

/// Two-tier key/value config: group-specific rows override global ones.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Group value, else global value, else `fallback`.
    async fn get_with_default(&self, group_id: GroupId, key: &str, fallback: &str) -> Result<String>;

    /// Set a value. `None` writes the global default.
    async fn set(&self, group_id: Option<GroupId>, key: &str, value: &str) -> Result<()>;

    /// Every `msg_*` key for a group, global values overridden by group values.
    async fn templates(&self, group_id: GroupId) -> Result<HashMap<String, String>>;
}

/// Membership activity tracking.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Active members whose last message (or join date, if they never
    /// spoke) is at least `days` old. Ordered oldest activity first.
    async fn list_inactive_since(&self, group_id: GroupId, days: u32) -> Result<Vec<InactiveMember>>;

    /// Soft-remove a membership.
    async fn mark_removed(&self, group_id: GroupId, member_id: MemberId) -> Result<()>;
}
