//! Append/update log of backup job records.
//!
//! The ledger is the only writer of job rows and enforces the lifecycle
//! `pending -> running -> {completed | failed}` with guarded UPDATEs: a
//! transition is a single statement conditioned on the expected current
//! status, so a row can never re-enter a non-terminal state.

use crate::backup::db::{from_db, to_db, Database};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Opaque job identifier (SQLite rowid underneath).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }

    fn from_db(raw: &str) -> Result<Self> {
        match raw {
            "scheduled" => Ok(TriggerKind::Scheduled),
            "manual" => Ok(TriggerKind::Manual),
            other => Err(Error::CorruptRecord(format!("bad trigger kind {other:?}"))),
        }
    }
}

/// Job lifecycle state with its companion data inline, so a completed job
/// without a locator or a failed job without a message is unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed { download_url: String },
    Failed { error_message: String },
}

/// Status discriminant without companion data, used for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Pending => "pending",
            StateKind::Running => "running",
            StateKind::Completed => "completed",
            StateKind::Failed => "failed",
        }
    }
}

impl JobState {
    pub fn kind(&self) -> StateKind {
        match self {
            JobState::Pending => StateKind::Pending,
            JobState::Running => StateKind::Running,
            JobState::Completed { .. } => StateKind::Completed,
            JobState::Failed { .. } => StateKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: JobId,
    pub trigger: TriggerKind,
    #[serde(flatten)]
    pub state: JobState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Set if and only if the job is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    pub file_count: u64,
    /// Artifact size in bytes (partial bytes written when the run failed).
    pub total_size: u64,
}

impl BackupJob {
    pub fn total_size_display(&self) -> String {
        human_size(self.total_size)
    }
}

pub fn human_size(bytes: u64) -> String {
    static UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JobFilter {
    pub state: Option<StateKind>,
    pub trigger: Option<TriggerKind>,
}

#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Clone)]
pub struct JobLedger {
    db: Database,
}

impl JobLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, trigger: TriggerKind, actor: &str, now: DateTime<Utc>) -> Result<BackupJob> {
        let id = self.db.with(|conn| {
            conn.execute(
                "INSERT INTO backup_jobs (trigger_kind, status, created_by, created_at) \
                 VALUES (?1, 'pending', ?2, ?3)",
                params![trigger.as_str(), actor, to_db(now)],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        self.get(JobId(id))
    }

    pub fn mark_running(&self, id: JobId) -> Result<()> {
        self.transition(
            id,
            "running",
            "UPDATE backup_jobs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
        )
    }

    pub fn finish_completed(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        file_count: u64,
        total_size: u64,
        download_url: &str,
    ) -> Result<BackupJob> {
        let changed = self.db.with(|conn| {
            Ok(conn.execute(
                "UPDATE backup_jobs SET status = 'completed', completed_at = ?2, \
                 file_count = ?3, total_size = ?4, download_url = ?5 \
                 WHERE id = ?1 AND status = 'running'",
                params![id.0, to_db(now), file_count, total_size, download_url],
            )?)
        })?;
        if changed == 0 {
            return Err(self.transition_error(id, "completed"));
        }
        self.get(id)
    }

    pub fn finish_failed(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        file_count: u64,
        total_size: u64,
        error_message: &str,
    ) -> Result<BackupJob> {
        let changed = self.db.with(|conn| {
            Ok(conn.execute(
                "UPDATE backup_jobs SET status = 'failed', completed_at = ?2, \
                 file_count = ?3, total_size = ?4, error_message = ?5 \
                 WHERE id = ?1 AND status = 'running'",
                params![id.0, to_db(now), file_count, total_size, error_message],
            )?)
        })?;
        if changed == 0 {
            return Err(self.transition_error(id, "failed"));
        }
        self.get(id)
    }

    pub fn get(&self, id: JobId) -> Result<BackupJob> {
        self.db.with(|conn| {
            conn.query_row(
                "SELECT * FROM backup_jobs WHERE id = ?1",
                params![id.0],
                decode_job,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("backup job {id}")))?
        })
    }

    pub fn list(&self, filter: &JobFilter, page: &Page) -> Result<Vec<BackupJob>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(state) = filter.state {
            clauses.push("status = ?");
            args.push(state.as_str().into());
        }
        if let Some(trigger) = filter.trigger {
            clauses.push("trigger_kind = ?");
            args.push(trigger.as_str().into());
        }
        let mut sql = String::from("SELECT * FROM backup_jobs");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
            page.limit, page.offset
        ));

        self.db.with(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), decode_job)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// Terminal jobs whose `completed_at` is before `cutoff`, oldest first.
    /// Running jobs can never appear here: they have no `completed_at`.
    pub fn expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupJob>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM backup_jobs \
                 WHERE status IN ('completed', 'failed') AND completed_at < ?1 \
                 ORDER BY completed_at ASC",
            )?;
            let rows = stmt.query_map(params![to_db(cutoff)], decode_job)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    pub fn remove(&self, id: JobId) -> Result<()> {
        let changed = self.db.with(|conn| {
            Ok(conn.execute("DELETE FROM backup_jobs WHERE id = ?1", params![id.0])?)
        })?;
        if changed == 0 {
            return Err(Error::NotFound(format!("backup job {id}")));
        }
        Ok(())
    }

    /// Creation time of the most recent scheduled run, regardless of outcome.
    pub fn last_scheduled_run_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.db.with(|conn| {
            let raw: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM backup_jobs WHERE trigger_kind = 'scheduled'",
                [],
                |row| row.get(0),
            )?;
            raw.as_deref().map(from_db).transpose()
        })
    }

    pub fn running_count(&self) -> Result<u32> {
        self.db.with(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM backup_jobs WHERE status = 'running'",
                [],
                |row| row.get(0),
            )?)
        })
    }

    /// Crash reconciliation: non-terminal jobs created before `stale_before`
    /// are forced to `failed`, so an interrupted run cannot block future
    /// backups and a row orphaned between creation and its first transition
    /// does not linger as `pending`.
    pub fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        message: &str,
    ) -> Result<Vec<JobId>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM backup_jobs \
                 WHERE status IN ('pending', 'running') AND created_at < ?1",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(params![to_db(stale_before)], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            for id in &ids {
                conn.execute(
                    "UPDATE backup_jobs SET status = 'failed', completed_at = ?2, \
                     error_message = ?3 \
                     WHERE id = ?1 AND status IN ('pending', 'running')",
                    params![id, to_db(now), message],
                )?;
            }
            Ok(ids.into_iter().map(JobId).collect())
        })
    }

    fn transition(&self, id: JobId, to: &'static str, sql: &str) -> Result<()> {
        let changed = self
            .db
            .with(|conn| Ok(conn.execute(sql, params![id.0])?))?;
        if changed == 0 {
            return Err(self.transition_error(id, to));
        }
        Ok(())
    }

    fn transition_error(&self, id: JobId, to: &'static str) -> Error {
        match self.get(id) {
            Ok(job) => Error::InvalidTransition {
                id: id.0,
                from: job.state.kind().as_str().into(),
                to,
            },
            Err(e) => e,
        }
    }
}

fn decode_job(row: &Row) -> rusqlite::Result<Result<BackupJob>> {
    let id: i64 = row.get("id")?;
    let trigger: String = row.get("trigger_kind")?;
    let status: String = row.get("status")?;
    let created_by: String = row.get("created_by")?;
    let created_at: String = row.get("created_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let file_count: u64 = row.get("file_count")?;
    let total_size: u64 = row.get("total_size")?;
    let download_url: Option<String> = row.get("download_url")?;
    let error_message: Option<String> = row.get("error_message")?;

    Ok((|| {
        let state = decode_state(id, &status, download_url, error_message)?;
        let completed_at = completed_at.as_deref().map(from_db).transpose()?;
        if state.is_terminal() != completed_at.is_some() {
            return Err(Error::CorruptRecord(format!(
                "job {id}: completed_at must be set exactly for terminal states"
            )));
        }
        Ok(BackupJob {
            id: JobId(id),
            trigger: TriggerKind::from_db(&trigger)?,
            state,
            created_by,
            created_at: from_db(&created_at)?,
            completed_at,
            file_count,
            total_size,
        })
    })())
}

fn decode_state(
    id: i64,
    status: &str,
    download_url: Option<String>,
    error_message: Option<String>,
) -> Result<JobState> {
    match (status, download_url, error_message) {
        ("pending", None, None) => Ok(JobState::Pending),
        ("running", None, None) => Ok(JobState::Running),
        ("completed", Some(download_url), None) => Ok(JobState::Completed { download_url }),
        ("failed", None, Some(error_message)) => Ok(JobState::Failed { error_message }),
        (status, url, msg) => Err(Error::CorruptRecord(format!(
            "job {id}: status {status:?} with download_url={:?} error_message={:?}",
            url.is_some(),
            msg.is_some()
        ))),
    }
}
