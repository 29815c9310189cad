//! Job definitions — the core data model for scheduled work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::config::RetryConfig;
use warden_core::types::GroupId;

use crate::keys::{JobKey, JobKind};

/// Small payload carried with the action. Serialized as a JSON map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

/// What to run when the trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAction {
    pub kind: JobKind,
    pub payload: JobPayload,
}

impl JobAction {
    pub fn for_group(kind: JobKind, group_id: GroupId) -> Self {
        Self {
            kind,
            payload: JobPayload {
                group_id: Some(group_id),
            },
        }
    }

    pub fn global(kind: JobKind) -> Self {
        Self {
            kind,
            payload: JobPayload::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.action_name()
    }
}

/// A recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    /// 5-field cron expression.
    pub cron: String,
    pub action: JobAction,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    /// None when the expression never matches (only possible for stored junk).
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u32,
}

impl Job {
    pub fn new(key: JobKey, cron: &str, action: JobAction) -> Self {
        let now = Utc::now();
        Self {
            key,
            cron: cron.to_string(),
            action,
            created_at: now,
            updated_at: now,
            last_run: None,
            next_run: None,
            run_count: 0,
        }
    }

    /// Check if this job should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run.is_some_and(|next| now >= next)
    }
}

/// A job that fired and is waiting to be executed.
#[derive(Debug, Clone, PartialEq)]
pub struct DueJob {
    pub key: JobKey,
    pub action: JobAction,
    /// The trigger time that made this job due.
    pub scheduled_for: DateTime<Utc>,
}

/// Retry policy for transient job failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (1-based): base · 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_secs(30),
        }
    }
}
