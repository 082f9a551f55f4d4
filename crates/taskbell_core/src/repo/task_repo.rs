//! Task repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Select reminder candidates by due window and latch state.
//! - Persist latch transitions of one sweep as a single atomic write.
//!
//! # Invariants
//! - Candidate queries never return completed, opted-out, latched or undated
//!   tasks.
//! - A malformed candidate row is rejected on its own; the rest of the batch
//!   is still returned.
//! - `commit_sent_flags` applies all updates or none.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::reminder::{ReminderTier, ReminderWindow};
use crate::model::task::{Task, TaskId, TaskValidationError};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    text,
    due_at,
    completed,
    owner_id,
    sent_15,
    sent_30,
    email_notifications,
    created_at
FROM tasks";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for task and user persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(TaskValidationError),
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One staged latch transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFlagUpdate {
    pub task_id: TaskId,
    pub tier: ReminderTier,
}

/// Candidate row that could not be read as a valid task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub task_id: TaskId,
    pub message: String,
}

/// Result of one tier query: readable tasks in due order plus rejected rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateBatch {
    pub tasks: Vec<Task>,
    pub rejected: Vec<RejectedCandidate>,
}

impl From<Vec<Task>> for CandidateBatch {
    fn from(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            rejected: Vec::new(),
        }
    }
}

/// Task store as seen by the reminder core.
pub trait TaskRepository {
    /// Inserts a task. Used by the owning application, never by sweeps.
    fn create_task(&self, task: &Task) -> RepoResult<TaskId>;

    fn get_task(&self, id: &str) -> RepoResult<Option<Task>>;

    /// Open, opted-in tasks with `tier` unlatched and `due_at` in `window`.
    ///
    /// `Err` is reserved for query failures; unreadable rows go to
    /// `CandidateBatch::rejected`.
    fn query_reminder_candidates(
        &self,
        tier: ReminderTier,
        window: &ReminderWindow,
    ) -> RepoResult<CandidateBatch>;

    /// Sets every listed latch in one atomic write.
    ///
    /// Returns the number of task rows updated. Tasks deleted since they
    /// were queried are ignored.
    fn commit_sent_flags(&self, updates: &[SentFlagUpdate]) -> RepoResult<usize>;
}

impl<T: TaskRepository + ?Sized> TaskRepository for &T {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        (**self).create_task(task)
    }

    fn get_task(&self, id: &str) -> RepoResult<Option<Task>> {
        (**self).get_task(id)
    }

    fn query_reminder_candidates(
        &self,
        tier: ReminderTier,
        window: &ReminderWindow,
    ) -> RepoResult<CandidateBatch> {
        (**self).query_reminder_candidates(tier, window)
    }

    fn commit_sent_flags(&self, updates: &[SentFlagUpdate]) -> RepoResult<usize> {
        (**self).commit_sent_flags(updates)
    }
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        task.validate()?;

        self.conn.execute(
            "INSERT INTO tasks (
                id,
                text,
                due_at,
                completed,
                owner_id,
                sent_15,
                sent_30,
                email_notifications,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                task.id.as_str(),
                task.text.as_str(),
                task.due_at.map(|at| at.timestamp_millis()),
                bool_to_int(task.completed),
                task.owner_id.as_str(),
                bool_to_int(task.sent_15),
                bool_to_int(task.sent_30),
                bool_to_int(task.email_notifications),
                task.created_at.timestamp_millis(),
            ],
        )?;

        Ok(task.id.clone())
    }

    fn get_task(&self, id: &str) -> RepoResult<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} WHERE id = ?1;"))?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }

        Ok(None)
    }

    fn query_reminder_candidates(
        &self,
        tier: ReminderTier,
        window: &ReminderWindow,
    ) -> RepoResult<CandidateBatch> {
        let latch = latch_column(tier);
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE completed = 0
               AND email_notifications = 1
               AND {latch} = 0
               AND due_at IS NOT NULL
               AND due_at > ?1
               AND due_at <= ?2
             ORDER BY due_at ASC, id ASC;"
        ))?;

        let mut rows = stmt.query(params![
            window.start.timestamp_millis(),
            window.end.timestamp_millis()
        ])?;
        let mut batch = CandidateBatch::default();
        while let Some(row) = rows.next()? {
            match parse_task_row(row) {
                Ok(task) => batch.tasks.push(task),
                Err(err) => {
                    let task_id = row
                        .get::<_, String>("id")
                        .unwrap_or_else(|_| "<unreadable>".to_string());
                    warn!(
                        "event=reminder_query module=repo status=reject task_id={} tier={} error={}",
                        task_id, tier, err
                    );
                    batch.rejected.push(RejectedCandidate {
                        task_id,
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(batch)
    }

    fn commit_sent_flags(&self, updates: &[SentFlagUpdate]) -> RepoResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut applied = 0;
        for update in updates {
            let latch = latch_column(update.tier);
            let changed = tx.execute(
                &format!("UPDATE tasks SET {latch} = 1 WHERE id = ?1;"),
                [update.task_id.as_str()],
            )?;
            if changed == 0 {
                debug!(
                    "event=latch_commit module=repo status=skip task_id={} tier={} reason=task_missing",
                    update.task_id, update.tier
                );
            }
            applied += changed;
        }
        tx.commit()?;

        Ok(applied)
    }
}

fn latch_column(tier: ReminderTier) -> &'static str {
    match tier {
        ReminderTier::Near => "sent_15",
        ReminderTier::Far => "sent_30",
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let id: String = row.get("id")?;

    let due_at = match row.get::<_, Option<i64>>("due_at")? {
        Some(millis) => Some(millis_to_utc(millis, "tasks.due_at")?),
        None => None,
    };
    let created_at = millis_to_utc(row.get("created_at")?, "tasks.created_at")?;

    let task = Task {
        text: row.get("text")?,
        due_at,
        completed: int_to_bool(row.get("completed")?, "tasks.completed")?,
        owner_id: row.get("owner_id")?,
        sent_15: int_to_bool(row.get("sent_15")?, "tasks.sent_15")?,
        sent_30: int_to_bool(row.get("sent_30")?, "tasks.sent_30")?,
        email_notifications: int_to_bool(
            row.get("email_notifications")?,
            "tasks.email_notifications",
        )?,
        created_at,
        id,
    };
    task.validate()?;
    Ok(task)
}

pub(crate) fn millis_to_utc(millis: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        RepoError::InvalidData(format!("invalid timestamp `{millis}` in {column}"))
    })
}

fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
