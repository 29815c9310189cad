//! In-memory fakes for the collaborator traits.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, FixedOffset, Utc};
use warden_core::error::{Result, WardenError};
use warden_core::traits::{ConfigStore, GroupStore, MembershipStore, MessagingClient};
use warden_core::types::{
    Group, GroupId, GroupPatch, InactiveMember, MemberId, MemberUpsert, Participant, RemoteGroup,
    inactivity_cutoff,
};

pub fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

struct RosterEntry {
    group_id: GroupId,
    member: InactiveMember,
    removed: bool,
}

#[derive(Default)]
struct StoreState {
    groups: Vec<Group>,
    config: HashMap<(GroupId, String), String>,
    roster: Vec<RosterEntry>,
    members: Vec<MemberUpsert>,
    memberships: HashMap<(MemberId, GroupId), (bool, bool)>,
    removed: Vec<(GroupId, MemberId)>,
    fail_listing: HashSet<GroupId>,
    fail_mark_removed: HashSet<MemberId>,
    fail_config: HashSet<GroupId>,
}

/// Group, config and membership store backed by plain collections.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    inactivity_queries: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, id: GroupId, whatsapp_id: &str, name: &str) {
        self.add_group_with_times(id, whatsapp_id, name, None, None);
    }

    pub fn add_group_with_times(
        &self,
        id: GroupId,
        whatsapp_id: &str,
        name: &str,
        open: Option<&str>,
        close: Option<&str>,
    ) {
        self.state.lock().unwrap().groups.push(Group {
            id,
            whatsapp_id: whatsapp_id.into(),
            name: name.into(),
            open_time: open.map(String::from),
            close_time: close.map(String::from),
            is_closed: false,
        });
    }

    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.state.lock().unwrap().groups.iter().find(|g| g.id == id).cloned()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.state.lock().unwrap().groups.clone()
    }

    /// Active member of `group_id`, silent for `last_days_ago` days
    /// (`None` = never spoke) and joined `joined_days_ago` days ago.
    pub fn add_member(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        number: &str,
        last_days_ago: Option<i64>,
        joined_days_ago: i64,
    ) {
        let now = Utc::now();
        self.state.lock().unwrap().roster.push(RosterEntry {
            group_id,
            member: InactiveMember {
                member_id,
                whatsapp_id: format!("{number}@s.whatsapp.net"),
                whatsapp_number: number.into(),
                last_message_at: last_days_ago.map(|d| now - Duration::days(d)),
                joined_at: now - Duration::days(joined_days_ago),
            },
            removed: false,
        });
    }

    pub fn set_sync(&self, group_id: GroupId, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .config
            .insert((group_id, key.into()), value.into());
    }

    pub fn fail_listing_for(&self, group_id: GroupId) {
        self.state.lock().unwrap().fail_listing.insert(group_id);
    }

    pub fn fail_mark_removed_for(&self, member_id: MemberId) {
        self.state.lock().unwrap().fail_mark_removed.insert(member_id);
    }

    pub fn fail_config_for(&self, group_id: GroupId) {
        self.state.lock().unwrap().fail_config.insert(group_id);
    }

    pub fn removed(&self) -> Vec<(GroupId, MemberId)> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn members(&self) -> Vec<MemberUpsert> {
        self.state.lock().unwrap().members.clone()
    }

    /// `(is_owner, is_admin)` for a member JID in a group.
    pub fn membership_of(&self, whatsapp_id: &str, group_id: GroupId) -> Option<(bool, bool)> {
        let state = self.state.lock().unwrap();
        let idx = state.members.iter().position(|m| m.whatsapp_id == whatsapp_id)?;
        state
            .memberships
            .get(&(idx as MemberId + 1, group_id))
            .copied()
    }

    pub fn inactivity_queries(&self) -> usize {
        self.inactivity_queries.load(Ordering::SeqCst)
    }
}

fn group_not_found(id: impl ToString) -> WardenError {
    WardenError::NotFound("Group", id.to_string())
}

#[async_trait]
impl GroupStore for FakeStore {
    async fn get_by_id(&self, id: GroupId) -> Result<Group> {
        self.group(id).ok_or_else(|| group_not_found(id))
    }

    async fn get_by_whatsapp_id(&self, whatsapp_id: &str) -> Result<Group> {
        self.state
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.whatsapp_id == whatsapp_id)
            .cloned()
            .ok_or_else(|| group_not_found(whatsapp_id))
    }

    async fn update_settings(&self, id: GroupId, patch: GroupPatch) -> Result<Group> {
        let mut state = self.state.lock().unwrap();
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| group_not_found(id))?;
        if let Some(name) = patch.name {
            group.name = name;
        }
        if let Some(open) = patch.open_time {
            group.open_time = Some(open);
        }
        if let Some(close) = patch.close_time {
            group.close_time = Some(close);
        }
        if let Some(closed) = patch.is_closed {
            group.is_closed = closed;
        }
        Ok(group.clone())
    }

    async fn list_all(&self) -> Result<Vec<Group>> {
        Ok(self.groups())
    }

    async fn list_with_both_times_set(&self) -> Result<Vec<Group>> {
        Ok(self
            .groups()
            .into_iter()
            .filter(|g| g.schedule().is_some())
            .collect())
    }

    async fn create_group(
        &self,
        name: &str,
        whatsapp_id: &str,
        open_time: Option<&str>,
        close_time: Option<&str>,
    ) -> Result<Group> {
        let id = self.groups().iter().map(|g| g.id).max().unwrap_or(0) + 1;
        self.add_group_with_times(id, whatsapp_id, name, open_time, close_time);
        self.get_by_id(id).await
    }

    async fn upsert_member(&self, member: MemberUpsert) -> Result<MemberId> {
        let mut state = self.state.lock().unwrap();
        if let Some(idx) = state
            .members
            .iter()
            .position(|m| m.whatsapp_id == member.whatsapp_id)
        {
            state.members[idx] = member;
            return Ok(idx as MemberId + 1);
        }
        state.members.push(member);
        Ok(state.members.len() as MemberId)
    }

    async fn upsert_membership(
        &self,
        member_id: MemberId,
        group_id: GroupId,
        is_owner: bool,
        is_admin: bool,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .memberships
            .insert((member_id, group_id), (is_owner, is_admin));
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FakeStore {
    async fn get_with_default(&self, group_id: GroupId, key: &str, fallback: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        if state.fail_config.contains(&group_id) {
            return Err(WardenError::Storage("config unavailable".into()));
        }
        Ok(state
            .config
            .get(&(group_id, key.to_string()))
            .or_else(|| state.config.get(&(0, key.to_string())))
            .cloned()
            .unwrap_or_else(|| fallback.to_string()))
    }

    async fn set(&self, group_id: Option<GroupId>, key: &str, value: &str) -> Result<()> {
        self.set_sync(group_id.unwrap_or(0), key, value);
        Ok(())
    }

    async fn templates(&self, group_id: GroupId) -> Result<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        let mut merged = HashMap::new();
        for scope in [0, group_id] {
            for ((gid, key), value) in &state.config {
                if *gid == scope && key.starts_with("msg_") {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(merged)
    }
}

#[async_trait]
impl MembershipStore for FakeStore {
    async fn list_inactive_since(&self, group_id: GroupId, days: u32) -> Result<Vec<InactiveMember>> {
        self.inactivity_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_listing.contains(&group_id) {
            return Err(WardenError::Storage("membership query failed".into()));
        }
        let cutoff = inactivity_cutoff(Utc::now(), days)?;
        let mut out: Vec<InactiveMember> = state
            .roster
            .iter()
            .filter(|e| e.group_id == group_id && !e.removed)
            .filter(|e| e.member.last_activity() <= cutoff)
            .map(|e| e.member.clone())
            .collect();
        out.sort_by_key(|m| m.last_activity());
        Ok(out)
    }

    async fn mark_removed(&self, group_id: GroupId, member_id: MemberId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_mark_removed.contains(&member_id) {
            return Err(WardenError::Storage("write failed".into()));
        }
        let entry = state
            .roster
            .iter_mut()
            .find(|e| e.group_id == group_id && e.member.member_id == member_id)
            .ok_or_else(|| WardenError::NotFound("Membership", format!("{group_id}/{member_id}")))?;
        entry.removed = true;
        state.removed.push((group_id, member_id));
        Ok(())
    }
}

#[derive(Default)]
struct ClientState {
    sent: Vec<(String, String)>,
    send_calls: usize,
    removed: Vec<(String, Vec<String>)>,
    settings: Vec<(String, bool)>,
    fail_send_for: HashSet<String>,
    fail_send_calls: HashSet<usize>,
    fail_remove_for: HashSet<String>,
    fail_settings: usize,
    remote_groups: Vec<RemoteGroup>,
    participants: HashMap<String, Vec<Participant>>,
    fail_participants_for: HashSet<String>,
}

/// Messaging client that records every call.
#[derive(Default)]
pub struct RecordingClient {
    state: Mutex<ClientState>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful sends as `(to, text)`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn removed(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().removed.clone()
    }

    /// `(group, closed)` setting changes.
    pub fn settings(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().settings.clone()
    }

    pub fn fail_send_to(&self, to: &str) {
        self.state.lock().unwrap().fail_send_for.insert(to.into());
    }

    /// Fail the n-th send (0-based, counting every call).
    pub fn fail_send_call(&self, n: usize) {
        self.state.lock().unwrap().fail_send_calls.insert(n);
    }

    pub fn fail_remove_in(&self, group: &str) {
        self.state.lock().unwrap().fail_remove_for.insert(group.into());
    }

    /// Fail the next `n` open/close calls.
    pub fn fail_next_settings(&self, n: usize) {
        self.state.lock().unwrap().fail_settings = n;
    }

    pub fn add_remote_group(&self, whatsapp_id: &str, name: &str, participants: Vec<Participant>) {
        let mut state = self.state.lock().unwrap();
        state.remote_groups.push(RemoteGroup {
            whatsapp_id: whatsapp_id.into(),
            name: name.into(),
        });
        state.participants.insert(whatsapp_id.into(), participants);
    }

    pub fn fail_participants_in(&self, group: &str) {
        self.state.lock().unwrap().fail_participants_for.insert(group.into());
    }

    fn record_setting(&self, group: &str, closed: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_settings > 0 {
            state.fail_settings -= 1;
            return Err(WardenError::External("updateSetting: 503".into()));
        }
        state.settings.push((group.into(), closed));
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for RecordingClient {
    async fn send_message(&self, to: &str, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let call = state.send_calls;
        state.send_calls += 1;
        if state.fail_send_for.contains(to) || state.fail_send_calls.contains(&call) {
            return Err(WardenError::External(format!("sendText to {to}: 500")));
        }
        state.sent.push((to.into(), text.into()));
        Ok(())
    }

    async fn bulk_remove(&self, group_whatsapp_id: &str, member_numbers: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove_for.contains(group_whatsapp_id) {
            return Err(WardenError::External(format!(
                "removeParticipants in {group_whatsapp_id}: 500"
            )));
        }
        state
            .removed
            .push((group_whatsapp_id.into(), member_numbers.to_vec()));
        Ok(())
    }

    async fn open_group(&self, group_whatsapp_id: &str) -> Result<()> {
        self.record_setting(group_whatsapp_id, false)
    }

    async fn close_group(&self, group_whatsapp_id: &str) -> Result<()> {
        self.record_setting(group_whatsapp_id, true)
    }

    async fn find_groups(&self) -> Result<Vec<RemoteGroup>> {
        Ok(self.state.lock().unwrap().remote_groups.clone())
    }

    async fn find_participants(&self, group_whatsapp_id: &str) -> Result<Vec<Participant>> {
        let state = self.state.lock().unwrap();
        if state.fail_participants_for.contains(group_whatsapp_id) {
            return Err(WardenError::External("participants: 500".into()));
        }
        Ok(state
            .participants
            .get(group_whatsapp_id)
            .cloned()
            .unwrap_or_default())
    }
}
