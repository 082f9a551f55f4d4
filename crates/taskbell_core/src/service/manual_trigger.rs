//! On-demand test reminder for one task.
//!
//! # Responsibility
//! - Authenticate and authorize the caller against the task owner.
//! - Render and mail a single reminder outside the sweep.
//!
//! # Invariants
//! - Never reads or writes `sent_15` / `sent_30`.
//! - Errors map onto a closed set of kinds returned to the caller as-is.

use crate::logging::sanitize_message;
use crate::model::reminder::ReminderTier;
use crate::model::task::TaskId;
use crate::repo::task_repo::TaskRepository;
use crate::repo::user_repo::EmailDirectory;
use crate::service::clock::{Clock, SystemClock};
use crate::service::mailer::{Mailer, OutboundEmail};
use crate::service::render::ReminderRenderer;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const MAX_LOGGED_ERROR_CHARS: usize = 240;

/// Authenticated caller of the trigger surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: String,
}

impl CallerIdentity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

/// Wire request: `{"taskId": "...", "tier": 15 | 30}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNotificationRequest {
    pub task_id: TaskId,
    /// Defaults to the 30-minute tier.
    #[serde(default)]
    pub tier: Option<ReminderTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNotificationResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    Unauthenticated,
    NotFound(TaskId),
    PermissionDenied,
    Internal(String),
}

impl TriggerError {
    /// Stable machine-readable kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Internal(_) => "internal",
        }
    }
}

impl Display for TriggerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "user must be authenticated"),
            Self::NotFound(task_id) => write!(f, "task not found: {task_id}"),
            Self::PermissionDenied => write!(f, "not authorized for this task"),
            Self::Internal(message) => write!(f, "failed to send notification: {message}"),
        }
    }
}

impl Error for TriggerError {}

/// Sends reminders on request, bypassing windows and latches.
pub struct ManualTriggerHandler<R, D, M> {
    repo: R,
    directory: D,
    mailer: M,
    renderer: ReminderRenderer,
    clock: Box<dyn Clock>,
}

impl<R, D, M> ManualTriggerHandler<R, D, M>
where
    R: TaskRepository,
    D: EmailDirectory,
    M: Mailer,
{
    pub fn new(repo: R, directory: D, mailer: M, renderer: ReminderRenderer) -> Self {
        Self {
            repo,
            directory,
            mailer,
            renderer,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn send_test_notification(
        &self,
        caller: Option<&CallerIdentity>,
        request: &TestNotificationRequest,
    ) -> Result<TestNotificationResponse, TriggerError> {
        let result = self.try_send(caller, request);
        match &result {
            Ok(_) => info!(
                "event=manual_trigger module=manual_trigger status=ok task_id={}",
                request.task_id
            ),
            Err(err @ TriggerError::Internal(_)) => error!(
                "event=manual_trigger module=manual_trigger status=error task_id={} code={} error={}",
                request.task_id,
                err.code(),
                err
            ),
            Err(err) => warn!(
                "event=manual_trigger module=manual_trigger status=rejected task_id={} code={}",
                request.task_id,
                err.code()
            ),
        }
        result
    }

    fn try_send(
        &self,
        caller: Option<&CallerIdentity>,
        request: &TestNotificationRequest,
    ) -> Result<TestNotificationResponse, TriggerError> {
        let caller = caller.ok_or(TriggerError::Unauthenticated)?;

        let task = self
            .repo
            .get_task(&request.task_id)
            .map_err(internal)?
            .ok_or_else(|| TriggerError::NotFound(request.task_id.clone()))?;

        if task.owner_id != caller.uid {
            return Err(TriggerError::PermissionDenied);
        }

        let recipient = self
            .directory
            .resolve_email(&task.owner_id)
            .map_err(internal)?
            .ok_or_else(|| TriggerError::Internal("no email found for task owner".to_string()))?;

        let tier = request.tier.unwrap_or_default();
        let rendered = self.renderer.render(&task, tier, self.clock.now());
        self.mailer
            .send(&OutboundEmail::from_rendered(recipient, rendered))
            .map_err(internal)?;

        Ok(TestNotificationResponse {
            success: true,
            message: "Test notification sent".to_string(),
        })
    }
}

fn internal(err: impl Display) -> TriggerError {
    TriggerError::Internal(sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS))
}
