//! SQLite-backed persistence for scheduled jobs.
//! Survives restarts; one row per job key.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use warden_core::error::{Result, WardenError};

use crate::keys::{JobKey, JobKind};
use crate::store::JobStore;
use crate::tasks::{Job, JobAction, JobPayload};

/// SQLite-backed job store.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| storage("DB open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage("DB open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WardenError::Storage(format!("Lock: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                key TEXT PRIMARY KEY,
                cron TEXT NOT NULL,              -- 'MIN HOUR * * *'
                action TEXT NOT NULL,            -- 'open-group', 'close-group', ...
                payload TEXT NOT NULL DEFAULT '{}',
                seq INTEGER NOT NULL,            -- registration order
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_run TEXT,
                next_run TEXT,
                run_count INTEGER NOT NULL DEFAULT 0
            );
         ",
            )
            .map_err(|e| storage("Migration", e))
    }
}

impl JobStore for SchedulerDb {
    fn upsert_all(&self, jobs: &[Job]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| storage("Begin upsert", e))?;
        for job in jobs {
            upsert_row(&tx, job)?;
        }
        tx.commit().map_err(|e| storage("Commit upsert", e))
    }

    fn remove(&self, key: &JobKey) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM scheduled_jobs WHERE key = ?1", [key.as_str()])
            .map_err(|e| storage("Delete job", e))?;
        Ok(removed > 0)
    }

    fn load_all(&self) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, cron, action, payload, created_at, updated_at, last_run, next_run, run_count
                 FROM scheduled_jobs ORDER BY seq",
            )
            .map_err(|e| storage("Load jobs", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, u32>(8)?,
                ))
            })
            .map_err(|e| storage("Load jobs", e))?;

        let mut jobs = Vec::new();
        for row in rows {
            let (key, cron, action, payload, created_at, updated_at, last_run, next_run, run_count) =
                row.map_err(|e| storage("Read job row", e))?;

            let Some(kind) = JobKind::from_action_name(&action) else {
                tracing::warn!("⚠️ Skipping job '{}' with unknown action '{}'", key, action);
                continue;
            };
            let payload: JobPayload = serde_json::from_str(&payload).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Bad payload for job '{}': {e}", key);
                JobPayload::default()
            });

            jobs.push(Job {
                key: JobKey::from_stored(key),
                cron,
                action: JobAction { kind, payload },
                created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
                updated_at: parse_time(&updated_at).unwrap_or_else(Utc::now),
                last_run: last_run.as_deref().and_then(parse_time),
                next_run: next_run.as_deref().and_then(parse_time),
                run_count,
            });
        }
        Ok(jobs)
    }

    fn record_run(&self, job: &Job) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE scheduled_jobs SET last_run = ?2, next_run = ?3, run_count = ?4
                 WHERE key = ?1 AND cron = ?5",
                params![
                    job.key.as_str(),
                    job.last_run.map(|t| t.to_rfc3339()),
                    job.next_run.map(|t| t.to_rfc3339()),
                    job.run_count,
                    job.cron,
                ],
            )
            .map_err(|e| storage("Record run", e))?;
        Ok(())
    }
}

/// Single statement: the old trigger is replaced, never duplicated.
fn upsert_row(conn: &Connection, job: &Job) -> Result<()> {
    let payload = serde_json::to_string(&job.action.payload)?;
    conn.execute(
        "INSERT INTO scheduled_jobs
         (key, cron, action, payload, seq, created_at, updated_at, last_run, next_run, run_count)
         VALUES (?1, ?2, ?3, ?4,
                 (SELECT COALESCE(MAX(seq), 0) + 1 FROM scheduled_jobs),
                 ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(key) DO UPDATE SET
            cron = excluded.cron,
            action = excluded.action,
            payload = excluded.payload,
            updated_at = excluded.updated_at,
            next_run = excluded.next_run",
        params![
            job.key.as_str(),
            job.cron,
            job.action.name(),
            payload,
            job.created_at.to_rfc3339(),
            job.updated_at.to_rfc3339(),
            job.last_run.map(|t| t.to_rfc3339()),
            job.next_run.map(|t| t.to_rfc3339()),
            job.run_count,
        ],
    )
    .map_err(|e| storage("Upsert job", e))?;
    Ok(())
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn storage(op: &str, e: rusqlite::Error) -> WardenError {
    WardenError::Storage(format!("{op}: {e}"))
}
