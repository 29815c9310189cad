//! Job keys — deterministic identifiers derived from (action kind, group id).
//!
//! Because the key is a pure function of its inputs, scheduling the same
//! group twice is an upsert of the same row rather than a second job.

use serde::{Deserialize, Serialize};
use warden_core::error::{Result, WardenError};
use warden_core::types::GroupId;

/// What a scheduled job does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    OpenGroup,
    CloseGroup,
    SyncGroups,
    CheckInactivity,
}

impl JobKind {
    /// Action name stored with the job and used for dispatch.
    pub fn action_name(self) -> &'static str {
        match self {
            JobKind::OpenGroup => "open-group",
            JobKind::CloseGroup => "close-group",
            JobKind::SyncGroups => "sync-groups",
            JobKind::CheckInactivity => "check-inactivity",
        }
    }

    pub fn from_action_name(name: &str) -> Option<Self> {
        match name {
            "open-group" => Some(JobKind::OpenGroup),
            "close-group" => Some(JobKind::CloseGroup),
            "sync-groups" => Some(JobKind::SyncGroups),
            "check-inactivity" => Some(JobKind::CheckInactivity),
            _ => None,
        }
    }

    /// Whether one job of this kind exists per group (vs. one global job).
    pub fn is_per_group(self) -> bool {
        matches!(self, JobKind::OpenGroup | JobKind::CloseGroup)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action_name())
    }
}

/// Stable identifier of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    /// Derive the key for a kind, validating the group id against the kind.
    ///
    /// Per-group kinds map to `open:<id>` / `close:<id>`; global kinds map to
    /// their action name.
    pub fn derive(kind: JobKind, group_id: Option<GroupId>) -> Result<Self> {
        match (kind, group_id) {
            (JobKind::OpenGroup, Some(id)) => Ok(Self(format!("open:{}", checked_id(id)?))),
            (JobKind::CloseGroup, Some(id)) => Ok(Self(format!("close:{}", checked_id(id)?))),
            (JobKind::OpenGroup | JobKind::CloseGroup, None) => Err(WardenError::Validation(
                format!("Job '{kind}' requires a group id"),
            )),
            (_, Some(id)) => Err(WardenError::Validation(format!(
                "Job '{kind}' is global and takes no group id (got {id})"
            ))),
            (_, None) => Ok(Self(kind.action_name().to_string())),
        }
    }

    /// Key of the global job for `kind`.
    pub fn global(kind: JobKind) -> Result<Self> {
        Self::derive(kind, None)
    }

    /// `open:<id>` and `close:<id>`.
    pub fn group_pair(group_id: GroupId) -> Result<(Self, Self)> {
        Ok((
            Self::derive(JobKind::OpenGroup, Some(group_id))?,
            Self::derive(JobKind::CloseGroup, Some(group_id))?,
        ))
    }

    /// Rebuild a key read back from storage.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn checked_id(id: GroupId) -> Result<GroupId> {
    if id <= 0 {
        return Err(WardenError::Validation(format!(
            "Group ID is required (got {id})"
        )));
    }
    Ok(id)
}
