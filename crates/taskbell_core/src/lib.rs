//! Core logic for Taskbell, the due-soon task reminder service.
//! Owns reminder windows, latch semantics and delivery orchestration.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{Config, ConfigError, SmtpSettings, SmtpTls};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::reminder::{
    NotificationEvent, ReminderLatch, ReminderTier, ReminderWindow, UnknownTierError,
};
pub use model::task::{Task, TaskId, TaskValidationError, FALLBACK_TASK_LABEL};
pub use repo::task_repo::{
    CandidateBatch, RejectedCandidate, RepoError, RepoResult, SentFlagUpdate,
    SqliteTaskRepository, TaskRepository,
};
pub use repo::user_repo::{EmailDirectory, SqliteUserDirectory, UserRecord};
pub use service::clock::{Clock, FixedClock, SystemClock};
pub use service::dispatcher::{
    CandidateOutcome, DispatchOutcome, FailureReason, ReminderDispatcher, RunSummary, SkipReason,
    TierQueryFailure,
};
pub use service::mailer::{DryRunMailer, MailError, Mailer, OutboundEmail, SmtpMailer};
pub use service::manual_trigger::{
    CallerIdentity, ManualTriggerHandler, TestNotificationRequest, TestNotificationResponse,
    TriggerError,
};
pub use service::render::{minutes_remaining, RenderedReminder, ReminderRenderer};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
