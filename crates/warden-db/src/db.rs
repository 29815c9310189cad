//! Group inventory SQLite database.
//!
//! Timestamps are stored as RFC 3339 UTC strings with second precision
//! (`2026-01-31T09:00:00Z`), so lexical order equals time order and the
//! inactivity cutoff can be compared in SQL.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use warden_core::error::{Result, WardenError};
use warden_core::traits::{ConfigStore, GroupStore, MembershipStore};
use warden_core::types::{
    Group, GroupId, GroupPatch, InactiveMember, MemberId, MemberUpsert, inactivity_cutoff,
};

/// `group_config.group_id` used for global defaults.
pub const GLOBAL_CONFIG_ID: GroupId = 0;

/// Group inventory database.
pub struct WardenDb {
    conn: Mutex<Connection>,
}

impl WardenDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| storage("DB open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage("DB open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| storage("Pragma", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WardenError::Storage(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                whatsapp_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                open_time TEXT,
                close_time TEXT,
                is_closed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT DEFAULT (datetime('now')),
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                whatsapp_id TEXT NOT NULL UNIQUE,
                whatsapp_number TEXT NOT NULL,
                lid TEXT,
                created_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS memberships (
                member_id INTEGER NOT NULL REFERENCES members(id),
                group_id INTEGER NOT NULL REFERENCES groups(id),
                is_owner INTEGER NOT NULL DEFAULT 0,
                is_admin INTEGER NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL,
                last_message_at TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                removed_at TEXT,
                PRIMARY KEY (member_id, group_id)
            );

            CREATE INDEX IF NOT EXISTS idx_memberships_group
                ON memberships(group_id, removed_at);

            CREATE TABLE IF NOT EXISTS group_config (
                group_id INTEGER NOT NULL DEFAULT 0,   -- 0 = global default
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT (datetime('now')),
                PRIMARY KEY (group_id, key)
            );
        ",
            )
            .map_err(|e| storage("Migration", e))
    }

    /// Insert or re-activate a membership that started at `joined_at`.
    pub fn add_membership_at(
        &self,
        member_id: MemberId,
        group_id: GroupId,
        joined_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO memberships (member_id, group_id, joined_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(member_id, group_id) DO UPDATE SET
                    joined_at = excluded.joined_at,
                    last_message_at = NULL,
                    removed_at = NULL",
                params![member_id, group_id, ts(joined_at)],
            )
            .map_err(|e| storage("Add membership", e))?;
        Ok(())
    }

    /// Record a message from `member_id` in `group_id` at `at`.
    pub fn record_message_at(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE memberships
                 SET last_message_at = ?3, message_count = message_count + 1
                 WHERE group_id = ?1 AND member_id = ?2 AND removed_at IS NULL",
                params![group_id, member_id, ts(at)],
            )
            .map_err(|e| storage("Record message", e))?;
        if updated == 0 {
            return Err(WardenError::NotFound(
                "Membership",
                format!("member {member_id} in group {group_id}"),
            ));
        }
        Ok(())
    }

    /// Whether the membership exists and has not been removed.
    pub fn is_active_member(&self, group_id: GroupId, member_id: MemberId) -> Result<bool> {
        let removed_at: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT removed_at FROM memberships WHERE group_id = ?1 AND member_id = ?2",
                params![group_id, member_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| storage("Membership lookup", e))?;
        Ok(matches!(removed_at, Some(None)))
    }

    fn group_where(&self, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<Group>> {
        let sql = format!(
            "SELECT id, whatsapp_id, name, open_time, close_time, is_closed FROM groups WHERE {clause}"
        );
        self.conn()?
            .query_row(&sql, &[value], group_from_row)
            .optional()
            .map_err(|e| storage("Group lookup", e))
    }

    fn list_groups(&self, filter: &str) -> Result<Vec<Group>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT id, whatsapp_id, name, open_time, close_time, is_closed FROM groups {filter} ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| storage("List groups", e))?;
        let rows = stmt
            .query_map([], group_from_row)
            .map_err(|e| storage("List groups", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage("List groups", e))
    }

    fn config_value(&self, group_id: GroupId, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM group_config WHERE group_id = ?1 AND key = ?2",
                params![group_id, key],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| storage("Config lookup", e))
    }
}

#[async_trait]
impl GroupStore for WardenDb {
    async fn get_by_id(&self, id: GroupId) -> Result<Group> {
        if id <= 0 {
            return Err(WardenError::Validation(format!("Group ID is required (got {id})")));
        }
        self.group_where("id = ?1", &id)?
            .ok_or_else(|| WardenError::NotFound("Group", id.to_string()))
    }

    async fn get_by_whatsapp_id(&self, whatsapp_id: &str) -> Result<Group> {
        if whatsapp_id.is_empty() {
            return Err(WardenError::Validation("WhatsApp ID is required".into()));
        }
        self.group_where("whatsapp_id = ?1", &whatsapp_id)?
            .ok_or_else(|| WardenError::NotFound("Group", whatsapp_id.to_string()))
    }

    async fn update_settings(&self, id: GroupId, patch: GroupPatch) -> Result<Group> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE groups SET
                    name = COALESCE(?2, name),
                    open_time = COALESCE(?3, open_time),
                    close_time = COALESCE(?4, close_time),
                    is_closed = COALESCE(?5, is_closed),
                    updated_at = datetime('now')
                 WHERE id = ?1",
                params![id, patch.name, patch.open_time, patch.close_time, patch.is_closed],
            )
            .map_err(|e| storage("Update group", e))?;
        if updated == 0 {
            return Err(WardenError::NotFound("Group", id.to_string()));
        }
        tracing::debug!("Group {id} settings updated");
        self.get_by_id(id).await
    }

    async fn list_all(&self) -> Result<Vec<Group>> {
        self.list_groups("")
    }

    async fn list_with_both_times_set(&self) -> Result<Vec<Group>> {
        self.list_groups("WHERE open_time IS NOT NULL AND close_time IS NOT NULL")
    }

    async fn create_group(
        &self,
        name: &str,
        whatsapp_id: &str,
        open_time: Option<&str>,
        close_time: Option<&str>,
    ) -> Result<Group> {
        if name.is_empty() {
            return Err(WardenError::Validation("Group name is required".into()));
        }
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO groups (whatsapp_id, name, open_time, close_time) VALUES (?1, ?2, ?3, ?4)",
                params![whatsapp_id, name, open_time, close_time],
            )
            .map_err(|e| storage("Create group", e))?;
            conn.last_insert_rowid()
        };
        tracing::info!("🆕 Group created: '{}' ({}) id={}", name, whatsapp_id, id);
        self.get_by_id(id).await
    }

    async fn upsert_member(&self, member: MemberUpsert) -> Result<MemberId> {
        self.conn()?
            .query_row(
                "INSERT INTO members (whatsapp_id, whatsapp_number, lid) VALUES (?1, ?2, ?3)
                 ON CONFLICT(whatsapp_id) DO UPDATE SET
                    whatsapp_number = excluded.whatsapp_number,
                    lid = COALESCE(excluded.lid, members.lid)
                 RETURNING id",
                params![member.whatsapp_id, member.whatsapp_number, member.lid],
                |r| r.get(0),
            )
            .map_err(|e| storage("Upsert member", e))
    }

    async fn upsert_membership(
        &self,
        member_id: MemberId,
        group_id: GroupId,
        is_owner: bool,
        is_admin: bool,
    ) -> Result<()> {
        // A removed membership comes back as a fresh join.
        self.conn()?
            .execute(
                "INSERT INTO memberships (member_id, group_id, is_owner, is_admin, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(member_id, group_id) DO UPDATE SET
                    is_owner = excluded.is_owner,
                    is_admin = excluded.is_admin,
                    joined_at = CASE WHEN memberships.removed_at IS NULL
                                     THEN memberships.joined_at ELSE excluded.joined_at END,
                    last_message_at = CASE WHEN memberships.removed_at IS NULL
                                     THEN memberships.last_message_at ELSE NULL END,
                    removed_at = NULL",
                params![member_id, group_id, is_owner, is_admin, ts(Utc::now())],
            )
            .map_err(|e| storage("Upsert membership", e))?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for WardenDb {
    async fn get_with_default(&self, group_id: GroupId, key: &str, fallback: &str) -> Result<String> {
        if let Some(value) = self.config_value(group_id, key)? {
            return Ok(value);
        }
        if let Some(value) = self.config_value(GLOBAL_CONFIG_ID, key)? {
            return Ok(value);
        }
        Ok(fallback.to_string())
    }

    async fn set(&self, group_id: Option<GroupId>, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(WardenError::Validation("Config key is required".into()));
        }
        let group_id = group_id.unwrap_or(GLOBAL_CONFIG_ID);
        self.conn()?
            .execute(
                "INSERT INTO group_config (group_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(group_id, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = datetime('now')",
                params![group_id, key, value],
            )
            .map_err(|e| storage("Set config", e))?;
        Ok(())
    }

    async fn templates(&self, group_id: GroupId) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, value FROM group_config
                 WHERE group_id IN (?1, ?2) AND key LIKE 'msg\\_%' ESCAPE '\\'
                 ORDER BY CASE WHEN group_id = ?1 THEN 0 ELSE 1 END",
            )
            .map_err(|e| storage("Load templates", e))?;
        let rows = stmt
            .query_map(params![GLOBAL_CONFIG_ID, group_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .map_err(|e| storage("Load templates", e))?;

        // Global rows come first, group rows overwrite them.
        let mut templates = HashMap::new();
        for row in rows {
            let (key, value) = row.map_err(|e| storage("Load templates", e))?;
            templates.insert(key, value);
        }
        Ok(templates)
    }
}

#[async_trait]
impl MembershipStore for WardenDb {
    async fn list_inactive_since(&self, group_id: GroupId, days: u32) -> Result<Vec<InactiveMember>> {
        let cutoff = ts(inactivity_cutoff(Utc::now(), days)?);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.whatsapp_id, m.whatsapp_number, ms.last_message_at, ms.joined_at
                 FROM memberships ms JOIN members m ON m.id = ms.member_id
                 WHERE ms.group_id = ?1
                   AND ms.removed_at IS NULL
                   AND ms.is_admin = 0
                   AND COALESCE(ms.last_message_at, ms.joined_at) <= ?2
                 ORDER BY COALESCE(ms.last_message_at, ms.joined_at), m.id",
            )
            .map_err(|e| storage("List inactive", e))?;
        let rows = stmt
            .query_map(params![group_id, cutoff], |r| {
                Ok((
                    r.get::<_, MemberId>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| storage("List inactive", e))?;

        let mut members = Vec::new();
        for row in rows {
            let (member_id, whatsapp_id, whatsapp_number, last_message_at, joined_at) =
                row.map_err(|e| storage("List inactive", e))?;
            let Some(joined_at) = parse_ts(&joined_at) else {
                tracing::warn!("⚠️ Member {member_id} in group {group_id} has a bad join date");
                continue;
            };
            members.push(InactiveMember {
                member_id,
                whatsapp_id,
                whatsapp_number,
                last_message_at: last_message_at.as_deref().and_then(parse_ts),
                joined_at,
            });
        }
        Ok(members)
    }

    async fn mark_removed(&self, group_id: GroupId, member_id: MemberId) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE memberships SET removed_at = ?3
                 WHERE group_id = ?1 AND member_id = ?2 AND removed_at IS NULL",
                params![group_id, member_id, ts(Utc::now())],
            )
            .map_err(|e| storage("Mark removed", e))?;
        if updated > 0 {
            return Ok(());
        }
        let exists = conn
            .query_row(
                "SELECT 1 FROM memberships WHERE group_id = ?1 AND member_id = ?2",
                params![group_id, member_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| storage("Mark removed", e))?
            .is_some();
        if exists {
            Ok(())
        } else {
            Err(WardenError::NotFound(
                "Membership",
                format!("member {member_id} in group {group_id}"),
            ))
        }
    }
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        whatsapp_id: row.get(1)?,
        name: row.get(2)?,
        open_time: row.get(3)?,
        close_time: row.get(4)?,
        is_closed: row.get(5)?,
    })
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn storage(op: &str, e: rusqlite::Error) -> WardenError {
    WardenError::Storage(format!("{op}: {e}"))
}
