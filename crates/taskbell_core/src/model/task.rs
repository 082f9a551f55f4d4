//! Task record as owned by the surrounding to-do application.
//!
//! # Responsibility
//! - Mirror the task fields the reminder core reads or latches.
//! - Provide eligibility checks shared by repository and dispatcher paths.
//!
//! # Invariants
//! - `id` and `owner_id` are non-empty.
//! - `sent_15` / `sent_30` are one-way latches; core code never clears them.
//! - A task without `due_at` is never a reminder candidate.

use crate::model::reminder::{ReminderLatch, ReminderTier, ReminderWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Opaque task identifier assigned by the task store.
pub type TaskId = String;

/// Label used in notifications when a task has no usable text.
pub const FALLBACK_TASK_LABEL: &str = "Task";

/// One to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Display label shown in reminders.
    pub text: String,
    /// Absent means the task never gets scheduled reminders.
    pub due_at: Option<DateTime<Utc>>,
    pub completed: bool,
    /// Owning user; resolved to an email address by the directory.
    pub owner_id: String,
    /// 15-minute reminder latch.
    pub sent_15: bool,
    /// 30-minute reminder latch.
    pub sent_30: bool,
    /// Per-task email opt-in; scheduled sweeps skip tasks that opted out.
    pub email_notifications: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Creates an open task with a generated id and both latches unsent.
    pub fn new(owner_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), owner_id, text)
    }

    /// Creates an open task with a caller-provided id.
    pub fn with_id(
        id: impl Into<TaskId>,
        owner_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            due_at: None,
            completed: false,
            owner_id: owner_id.into(),
            sent_15: false,
            sent_30: false,
            email_notifications: true,
            created_at: Utc::now(),
        }
    }

    /// Sets the due instant, consuming and returning the task.
    pub fn due(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// Text to show in notifications, falling back to a generic label.
    pub fn display_label(&self) -> &str {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            FALLBACK_TASK_LABEL
        } else {
            trimmed
        }
    }

    /// Current latch state for one tier.
    pub fn latch(&self, tier: ReminderTier) -> ReminderLatch {
        let sent = match tier {
            ReminderTier::Near => self.sent_15,
            ReminderTier::Far => self.sent_30,
        };
        if sent {
            ReminderLatch::Sent
        } else {
            ReminderLatch::Unsent
        }
    }

    /// Applies a latch transition for one tier.
    ///
    /// Transitions only go forward; marking an already sent tier is a no-op.
    pub fn mark_sent(&mut self, tier: ReminderTier) {
        let latched = self.latch(tier).mark_sent().is_sent();
        match tier {
            ReminderTier::Near => self.sent_15 = latched,
            ReminderTier::Far => self.sent_30 = latched,
        }
    }

    /// Whether a scheduled sweep should pick this task for `tier` in `window`.
    pub fn is_reminder_candidate(&self, tier: ReminderTier, window: &ReminderWindow) -> bool {
        if self.completed || !self.email_notifications || self.latch(tier).is_sent() {
            return false;
        }
        self.due_at.is_some_and(|due_at| window.contains(due_at))
    }

    /// Checks record invariants before persistence.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.id.trim().is_empty() {
            return Err(TaskValidationError::EmptyId);
        }
        if self.owner_id.trim().is_empty() {
            return Err(TaskValidationError::EmptyOwner);
        }
        Ok(())
    }
}

/// Task invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    EmptyId,
    EmptyOwner,
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "task id cannot be empty"),
            Self::EmptyOwner => write!(f, "task owner_id cannot be empty"),
        }
    }
}

impl Error for TaskValidationError {}
