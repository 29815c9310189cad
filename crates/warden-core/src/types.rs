//! Domain types shared between stores, clients and services.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};

/// Internal numeric group id.
pub type GroupId = i64;

/// Internal numeric member id.
pub type MemberId = i64;

/// A managed WhatsApp group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Platform JID, e.g. `120363025246125486@g.us`.
    pub whatsapp_id: String,
    pub name: String,
    /// `HH:MM` local time the group opens.
    pub open_time: Option<String>,
    /// `HH:MM` local time the group closes.
    pub close_time: Option<String>,
    pub is_closed: bool,
}

impl Group {
    /// Both schedule times, if both are set.
    pub fn schedule(&self) -> Option<(&str, &str)> {
        match (self.open_time.as_deref(), self.close_time.as_deref()) {
            (Some(open), Some(close)) => Some((open, close)),
            _ => None,
        }
    }
}

/// Partial update applied by [`GroupStore::update_settings`](crate::traits::GroupStore::update_settings).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub is_closed: Option<bool>,
}

impl GroupPatch {
    pub fn closed(is_closed: bool) -> Self {
        Self {
            is_closed: Some(is_closed),
            ..Self::default()
        }
    }

    pub fn times(open_time: &str, close_time: &str) -> Self {
        Self {
            open_time: Some(open_time.to_string()),
            close_time: Some(close_time.to_string()),
            ..Self::default()
        }
    }

    pub fn renamed(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

/// Member identity as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberUpsert {
    /// `5511999999999@s.whatsapp.net`
    pub whatsapp_id: String,
    /// Phone number part of the JID, used for `@mentions`.
    pub whatsapp_number: String,
    /// Linked-device alias, when the platform exposes one.
    pub lid: Option<String>,
}

impl MemberUpsert {
    pub fn from_jid(whatsapp_id: &str, lid: Option<String>) -> Self {
        Self {
            whatsapp_id: whatsapp_id.to_string(),
            whatsapp_number: phone_from_jid(whatsapp_id).to_string(),
            lid,
        }
    }
}

/// A member whose last activity is older than a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InactiveMember {
    pub member_id: MemberId,
    pub whatsapp_id: String,
    pub whatsapp_number: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

impl InactiveMember {
    /// Last message, falling back to the join date for members who never spoke.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.joined_at)
    }
}

/// A group as listed by the messaging platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub whatsapp_id: String,
    pub name: String,
}

/// Participant role inside a platform group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Member,
    Admin,
    #[serde(rename = "superadmin")]
    Owner,
}

impl ParticipantRole {
    /// Map the platform's `admin` field (`null`, `"admin"`, `"superadmin"`).
    pub fn from_platform(value: Option<&str>) -> Self {
        match value {
            Some("superadmin") => ParticipantRole::Owner,
            Some("admin") => ParticipantRole::Admin,
            _ => ParticipantRole::Member,
        }
    }

    pub fn is_owner(self) -> bool {
        self == ParticipantRole::Owner
    }

    pub fn is_admin(self) -> bool {
        matches!(self, ParticipantRole::Admin | ParticipantRole::Owner)
    }
}

/// A participant of a platform group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub whatsapp_id: String,
    pub lid: Option<String>,
    pub role: ParticipantRole,
}

/// Strip the `@server` suffix from a JID.
pub fn phone_from_jid(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Latest activity instant that counts as inactive for `days` days.
///
/// Thresholds past chrono's date range are a `Validation` error.
pub fn inactivity_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| {
            WardenError::Validation(format!("Inactivity threshold of {days} days is out of range"))
        })
}
