//! Scheduled reminder sweep.
//!
//! # Responsibility
//! - Select near and far tier candidates from disjoint due-time windows.
//! - Render, resolve and mail one reminder per candidate.
//! - Commit every latch earned in the run as one atomic batch.
//!
//! # Invariants
//! - A latch is staged only after the mailer confirmed delivery.
//! - At most one latch per task is staged per run.
//! - The batch commit is issued after every send of the run has finished.
//! - A run never propagates errors; failures end up in `RunSummary`.
//!
//! # Failure semantics
//! - Query failure for a tier skips that tier for this run only.
//! - An unreadable task row fails only its own candidate.
//! - Commit failure drops all staged latches, so the next run may send the
//!   same reminders again (duplicate rather than drop).

use crate::logging::sanitize_message;
use crate::model::reminder::{NotificationEvent, ReminderTier, ReminderWindow};
use crate::model::task::{Task, TaskId};
use crate::repo::task_repo::{SentFlagUpdate, TaskRepository};
use crate::repo::user_repo::EmailDirectory;
use crate::service::clock::{Clock, SystemClock};
use crate::service::mailer::{Mailer, OutboundEmail};
use crate::service::render::ReminderRenderer;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const MAX_LOGGED_ERROR_CHARS: usize = 240;

/// Why a candidate was passed over without a send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Owner has no resolvable email address.
    MissingRecipient,
    /// Task already earned a latch earlier in this run.
    AlreadyStaged,
    /// Repository returned a task outside the tier's criteria.
    NotEligible,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRecipient => write!(f, "missing_recipient"),
            Self::AlreadyStaged => write!(f, "already_staged"),
            Self::NotEligible => write!(f, "not_eligible"),
        }
    }
}

/// Why a send attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// Stored task row could not be read.
    InvalidRecord(String),
    /// Owner lookup itself failed.
    Directory(String),
    /// Mail transport reported an error.
    Mail(String),
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRecord(message) => write!(f, "invalid record: {message}"),
            Self::Directory(message) => write!(f, "directory: {message}"),
            Self::Mail(message) => write!(f, "mail: {message}"),
        }
    }
}

/// Result of handling one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Skipped(SkipReason),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateOutcome {
    pub task_id: TaskId,
    pub tier: ReminderTier,
    pub outcome: DispatchOutcome,
    /// The task leaves this tier's window before the next tick, so an
    /// unsuccessful outcome here is a permanent miss.
    pub last_chance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierQueryFailure {
    pub tier: ReminderTier,
    pub message: String,
}

/// Everything one sweep did, for logging and assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<CandidateOutcome>,
    pub query_failures: Vec<TierQueryFailure>,
    /// Latches staged after successful sends.
    pub staged: usize,
    /// Task rows updated by the batch commit.
    pub committed: usize,
    pub commit_failure: Option<String>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            outcomes: Vec::new(),
            query_failures: Vec::new(),
            staged: 0,
            committed: 0,
            commit_failure: None,
        }
    }

    pub fn sent_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, DispatchOutcome::Sent))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, DispatchOutcome::Skipped(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|outcome| matches!(outcome, DispatchOutcome::Failed(_)))
    }

    /// Candidates of `tier` in processing order.
    pub fn tier_task_ids(&self, tier: ReminderTier) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.tier == tier)
            .map(|outcome| outcome.task_id.as_str())
            .collect()
    }

    /// True when nothing went wrong at the repository level.
    pub fn is_clean(&self) -> bool {
        self.query_failures.is_empty() && self.commit_failure.is_none()
    }

    fn count(&self, predicate: impl Fn(&DispatchOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.outcome))
            .count()
    }
}

/// Periodic reminder sweep over a task repository.
pub struct ReminderDispatcher<R, D, M> {
    repo: R,
    directory: D,
    mailer: M,
    renderer: ReminderRenderer,
    clock: Box<dyn Clock>,
    tick_interval: Duration,
}

impl<R, D, M> ReminderDispatcher<R, D, M>
where
    R: TaskRepository,
    D: EmailDirectory,
    M: Mailer,
{
    /// Creates a dispatcher on the system clock with a one-minute cadence.
    pub fn new(repo: R, directory: D, mailer: M, renderer: ReminderRenderer) -> Self {
        Self {
            repo,
            directory,
            mailer,
            renderer,
            clock: Box::new(SystemClock),
            tick_interval: Duration::minutes(1),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Cadence used only to judge whether a missed send can still be retried.
    pub fn with_tick_interval(mut self, tick_interval: std::time::Duration) -> Self {
        self.tick_interval = Duration::from_std(tick_interval).unwrap_or(self.tick_interval);
        self
    }

    /// Runs one sweep. Never fails; inspect the summary for problems.
    pub fn run(&self) -> RunSummary {
        let started = Instant::now();
        let now = self.clock.now();
        let mut summary = RunSummary::new(now);
        let mut staged: Vec<SentFlagUpdate> = Vec::new();
        let mut staged_ids: HashSet<TaskId> = HashSet::new();

        info!("event=reminder_sweep module=dispatcher status=start now={}", now.to_rfc3339());

        for tier in ReminderTier::ALL {
            let window = tier.window_at(now);
            let batch = match self.repo.query_reminder_candidates(tier, &window) {
                Ok(batch) => batch,
                Err(err) => {
                    let message = sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS);
                    error!(
                        "event=reminder_query module=dispatcher status=error tier={} error={}",
                        tier, message
                    );
                    summary.query_failures.push(TierQueryFailure { tier, message });
                    continue;
                }
            };
            debug!(
                "event=reminder_query module=dispatcher status=ok tier={} candidates={} rejected={}",
                tier,
                batch.tasks.len(),
                batch.rejected.len()
            );

            for rejected in batch.rejected {
                let outcome = DispatchOutcome::Failed(FailureReason::InvalidRecord(
                    sanitize_message(&rejected.message, MAX_LOGGED_ERROR_CHARS),
                ));
                log_outcome(&rejected.task_id, tier, &outcome, false);
                summary.outcomes.push(CandidateOutcome {
                    task_id: rejected.task_id,
                    tier,
                    outcome,
                    last_chance: false,
                });
            }

            for task in batch.tasks {
                let outcome = if staged_ids.contains(&task.id) {
                    DispatchOutcome::Skipped(SkipReason::AlreadyStaged)
                } else if !task.is_reminder_candidate(tier, &window) {
                    DispatchOutcome::Skipped(SkipReason::NotEligible)
                } else {
                    self.dispatch_one(&task, tier)
                };

                if outcome == DispatchOutcome::Sent {
                    staged_ids.insert(task.id.clone());
                    staged.push(SentFlagUpdate {
                        task_id: task.id.clone(),
                        tier,
                    });
                }

                let last_chance = self.is_last_chance(&task, tier, now);
                log_outcome(&task.id, tier, &outcome, last_chance);
                summary.outcomes.push(CandidateOutcome {
                    task_id: task.id,
                    tier,
                    outcome,
                    last_chance,
                });
            }
        }

        summary.staged = staged.len();
        match self.repo.commit_sent_flags(&staged) {
            Ok(committed) => summary.committed = committed,
            Err(err) => {
                let message = sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS);
                error!(
                    "event=latch_commit module=dispatcher status=error staged={} error={}",
                    staged.len(),
                    message
                );
                summary.commit_failure = Some(message);
            }
        }

        info!(
            "event=reminder_sweep module=dispatcher status={} sent={} skipped={} failed={} committed={} duration_ms={}",
            if summary.is_clean() { "ok" } else { "degraded" },
            summary.sent_count(),
            summary.skipped_count(),
            summary.failed_count(),
            summary.committed,
            started.elapsed().as_millis()
        );

        summary
    }

    fn dispatch_one(&self, task: &Task, tier: ReminderTier) -> DispatchOutcome {
        let recipient = match self.directory.resolve_email(&task.owner_id) {
            Ok(Some(email)) => email,
            Ok(None) => return DispatchOutcome::Skipped(SkipReason::MissingRecipient),
            Err(err) => {
                return DispatchOutcome::Failed(FailureReason::Directory(sanitize_message(
                    &err.to_string(),
                    MAX_LOGGED_ERROR_CHARS,
                )))
            }
        };

        let event = NotificationEvent {
            tier,
            task: task.clone(),
            recipient,
        };
        let rendered = self.renderer.render(&event.task, event.tier, self.clock.now());
        let email = OutboundEmail::from_rendered(event.recipient, rendered);

        match self.mailer.send(&email) {
            Ok(()) => DispatchOutcome::Sent,
            Err(err) => DispatchOutcome::Failed(FailureReason::Mail(sanitize_message(
                &err.to_string(),
                MAX_LOGGED_ERROR_CHARS,
            ))),
        }
    }

    fn is_last_chance(&self, task: &Task, tier: ReminderTier, now: DateTime<Utc>) -> bool {
        let next_window: ReminderWindow = tier.window_at(now + self.tick_interval);
        !task.due_at.is_some_and(|due_at| next_window.contains(due_at))
    }
}

fn log_outcome(task_id: &str, tier: ReminderTier, outcome: &DispatchOutcome, last_chance: bool) {
    match outcome {
        DispatchOutcome::Sent => info!(
            "event=reminder_send module=dispatcher status=ok task_id={} tier={}",
            task_id, tier
        ),
        DispatchOutcome::Skipped(reason) => warn!(
            "event=reminder_send module=dispatcher status=skipped task_id={} tier={} reason={} retry={}",
            task_id, tier, reason, !last_chance
        ),
        DispatchOutcome::Failed(reason) => warn!(
            "event=reminder_send module=dispatcher status=error task_id={} tier={} retry={} error={}",
            task_id, tier, !last_chance, reason
        ),
    }

    if last_chance && *outcome != DispatchOutcome::Sent {
        warn!(
            "event=reminder_miss module=dispatcher status=final task_id={} tier={}",
            task_id, tier
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::repo::task_repo::SqliteTaskRepository;
    use crate::repo::user_repo::{SqliteUserDirectory, UserRecord};
    use crate::service::clock::FixedClock;
    use crate::service::mailer::DryRunMailer;
    use chrono::TimeZone;

    #[test]
    fn last_chance_flags_tasks_leaving_the_window() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteTaskRepository::new(&conn);
        let users = SqliteUserDirectory::new(&conn);
        users.upsert_user(&UserRecord::new("u1", "u1@x.com")).unwrap();

        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let dispatcher = ReminderDispatcher::new(&repo, &users, DryRunMailer, ReminderRenderer::new())
            .with_clock(FixedClock(now));

        let leaving = Task::with_id("a", "u1", "x").due(now + Duration::seconds(30));
        let staying = Task::with_id("b", "u1", "x").due(now + Duration::minutes(10));
        assert!(dispatcher.is_last_chance(&leaving, ReminderTier::Near, now));
        assert!(!dispatcher.is_last_chance(&staying, ReminderTier::Near, now));

        let far_edge = Task::with_id("c", "u1", "x").due(now + Duration::seconds(15 * 60 + 30));
        assert!(dispatcher.is_last_chance(&far_edge, ReminderTier::Far, now));
    }

    #[test]
    fn summary_serializes_outcomes_with_status_tags() {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        let mut summary = RunSummary::new(now);
        summary.outcomes.push(CandidateOutcome {
            task_id: "t1".to_string(),
            tier: ReminderTier::Near,
            outcome: DispatchOutcome::Sent,
            last_chance: false,
        });
        summary.outcomes.push(CandidateOutcome {
            task_id: "t2".to_string(),
            tier: ReminderTier::Far,
            outcome: DispatchOutcome::Skipped(SkipReason::MissingRecipient),
            last_chance: true,
        });

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["outcomes"][0]["tier"], 15);
        assert_eq!(json["outcomes"][0]["outcome"]["status"], "sent");
        assert_eq!(json["outcomes"][1]["outcome"]["reason"], "missing_recipient");
        assert_eq!(json["commit_failure"], serde_json::Value::Null);
    }
}
