//! Message templates.
//!
//! Built-in defaults are overridden by the `msg_*` rows of the config store
//! (global first, then per group). Placeholders are `{name}` and are replaced
//! verbatim.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use warden_core::types::InactiveMember;

pub const WELCOME_RULES: &str = "msg_welcome_rules";
pub const WELCOME_SINGLE: &str = "msg_welcome_single";
pub const WELCOME_BATCH: &str = "msg_welcome_batch";
pub const WARNING_HEADER: &str = "msg_inactive_warning_header";
pub const WARNING_LINE: &str = "msg_inactive_warning_line";
pub const WARNING_FOOTER: &str = "msg_inactive_warning_footer";
pub const WARNING_NEVER: &str = "msg_inactive_warning_never";
pub const BAN_HEADER: &str = "msg_inactive_ban_header";
pub const BAN_LINE: &str = "msg_inactive_ban_line";
pub const BAN_LAST_MESSAGE: &str = "msg_inactive_ban_last_message";
pub const BAN_JOINED: &str = "msg_inactive_ban_joined";

/// Built-in templates.
pub const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (
        WELCOME_RULES,
        "Group rules:\n\
         - Respect every member.\n\
         - No spam or advertising.\n\
         - No inappropriate content.\n\
         - Follow the admins' guidance.\n\
         \n\
         Anyone breaking the rules will be removed.",
    ),
    (WELCOME_SINGLE, "Welcome to the group!\n\n{rules}"),
    (WELCOME_BATCH, "Welcome, {mentions}!\n\n{rules}"),
    (WARNING_HEADER, "⚠️ Inactive members ({days}+ days):"),
    (WARNING_LINE, "@{number} - Last message: {lastMessage}"),
    (WARNING_FOOTER, "Stay active to avoid being removed from the group."),
    (WARNING_NEVER, "Never"),
    (BAN_HEADER, "🚫 Members removed for inactivity ({days}+ days):"),
    (BAN_LINE, "@{number} - {reference}: {date}"),
    (BAN_LAST_MESSAGE, "Last message"),
    (BAN_JOINED, "Joined"),
];

const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Resolved template set for one group.
#[derive(Debug, Clone)]
pub struct Templates {
    values: HashMap<String, String>,
    offset: FixedOffset,
}

impl Templates {
    pub fn defaults(offset: FixedOffset) -> Self {
        Self::with_overrides(HashMap::new(), offset)
    }

    /// Defaults with `overrides` applied on top.
    pub fn with_overrides(overrides: HashMap<String, String>, offset: FixedOffset) -> Self {
        let mut values: HashMap<String, String> = DEFAULT_TEMPLATES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        values.extend(overrides);
        Self { values, offset }
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// `dd/mm/yyyy HH:MM` in the configured offset.
    pub fn format_date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset).format(DATE_FORMAT).to_string()
    }

    /// One welcome message for a batch of phone numbers, in arrival order.
    pub fn welcome(&self, phones: &[String]) -> String {
        let rules = self.get(WELCOME_RULES);
        if phones.len() == 1 {
            return self.get(WELCOME_SINGLE).replace("{rules}", rules);
        }
        let mentions = phones
            .iter()
            .map(|p| format!("@{p}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.get(WELCOME_BATCH)
            .replace("{mentions}", &mentions)
            .replace("{rules}", rules)
    }

    /// Header, one line per member, footer.
    pub fn inactivity_warning(&self, days: u32, members: &[InactiveMember]) -> String {
        let mut lines = Vec::with_capacity(members.len() + 2);
        lines.push(self.get(WARNING_HEADER).replace("{days}", &days.to_string()));
        for m in members {
            let last = match m.last_message_at {
                Some(at) => self.format_date(at),
                None => self.get(WARNING_NEVER).to_string(),
            };
            lines.push(
                self.get(WARNING_LINE)
                    .replace("{number}", &m.whatsapp_number)
                    .replace("{lastMessage}", &last),
            );
        }
        lines.push(self.get(WARNING_FOOTER).to_string());
        lines.join("\n")
    }

    /// Summary of members just removed, with their last activity reference.
    pub fn ban_summary(&self, days: u32, members: &[InactiveMember]) -> String {
        let mut lines = Vec::with_capacity(members.len() + 1);
        lines.push(self.get(BAN_HEADER).replace("{days}", &days.to_string()));
        for m in members {
            let reference = if m.last_message_at.is_some() {
                self.get(BAN_LAST_MESSAGE)
            } else {
                self.get(BAN_JOINED)
            };
            lines.push(
                self.get(BAN_LINE)
                    .replace("{number}", &m.whatsapp_number)
                    .replace("{reference}", reference)
                    .replace("{date}", &self.format_date(m.last_activity())),
            );
        }
        lines.join("\n")
    }
}
