mod common;

use chrono::Duration;
use common::{fixed_now, load, seed_task, seed_user, RecordingMailer};
use taskbell_core::db::open_db_in_memory;
use taskbell_core::{
    CandidateBatch, DispatchOutcome, FailureReason, FixedClock, RepoError, RepoResult,
    ReminderDispatcher, ReminderRenderer, ReminderTier, ReminderWindow, SentFlagUpdate,
    SkipReason, SqliteTaskRepository, SqliteUserDirectory, Task, TaskId, TaskRepository,
};

#[test]
fn end_to_end_near_tier_reminder() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "t1", "u1", now, Duration::minutes(10));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert!(summary.is_clean());
    assert_eq!(summary.sent_count(), 1);
    assert_eq!(summary.committed, 1);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "u1@x.com");
    assert!(sent[0].subject.contains("URGENT"));
    assert!(sent[0].subject.contains("15min"));

    let task = load(&conn, "t1");
    assert!(task.sent_15);
    assert!(!task.sent_30);
}

#[test]
fn every_near_window_task_gets_exactly_one_email() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_user(&conn, "u2", "u2@x.com");
    seed_task(&conn, "a", "u1", now, Duration::minutes(1));
    seed_task(&conn, "b", "u2", now, Duration::minutes(9));
    seed_task(&conn, "c", "u1", now, Duration::minutes(15));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert_eq!(summary.tier_task_ids(ReminderTier::Near), vec!["a", "b", "c"]);
    assert_eq!(mailer.sent_count(), 3);
    let recipients: Vec<String> = mailer.sent().into_iter().map(|email| email.to).collect();
    assert_eq!(recipients, vec!["u1@x.com", "u2@x.com", "u1@x.com"]);
    for id in ["a", "b", "c"] {
        assert!(load(&conn, id).sent_15, "task {id} should be latched");
    }
}

#[test]
fn boundary_task_is_only_in_near_tier() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "edge", "u1", now, Duration::minutes(15));
    seed_task(&conn, "far", "u1", now, Duration::minutes(22));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert_eq!(summary.tier_task_ids(ReminderTier::Near), vec!["edge"]);
    assert_eq!(summary.tier_task_ids(ReminderTier::Far), vec!["far"]);

    let edge = load(&conn, "edge");
    assert!(edge.sent_15 && !edge.sent_30);
    let far = load(&conn, "far");
    assert!(!far.sent_15 && far.sent_30);
}

#[test]
fn near_tier_is_processed_before_far_tier() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "far", "u1", now, Duration::minutes(29));
    seed_task(&conn, "near", "u1", now, Duration::minutes(3));

    ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    let subjects: Vec<String> = mailer.sent().into_iter().map(|email| email.subject).collect();
    assert_eq!(subjects.len(), 2);
    assert!(subjects[0].contains("URGENT"));
    assert!(subjects[1].contains("REMINDER (30min)"));
}

#[test]
fn second_run_sends_nothing_new() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "near", "u1", now, Duration::minutes(10));
    seed_task(&conn, "far", "u1", now, Duration::minutes(20));

    let dispatcher = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now));

    let first = dispatcher.run();
    assert_eq!(first.sent_count(), 2);

    let second = dispatcher.run();
    assert!(second.outcomes.is_empty());
    assert_eq!(second.committed, 0);
    assert_eq!(mailer.sent_count(), 2);
}

#[test]
fn far_then_near_reminders_follow_the_task_through_both_windows() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "t1", "u1", now, Duration::minutes(25));

    ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();
    let after_far = load(&conn, "t1");
    assert!(!after_far.sent_15 && after_far.sent_30);

    let later = now + Duration::minutes(12);
    ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(later))
        .run();
    let after_near = load(&conn, "t1");
    assert!(after_near.sent_15 && after_near.sent_30);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].subject.contains("30min"));
    assert!(sent[1].subject.contains("15min"));
    assert!(sent[1].text_body.contains("Time remaining: 13 minutes"));
}

#[test]
fn failed_send_leaves_flag_unset_and_retries_next_run() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_user(&conn, "u2", "u2@x.com");
    seed_task(&conn, "flaky", "u1", now, Duration::minutes(8));
    seed_task(&conn, "fine", "u2", now, Duration::minutes(9));

    let failing = RecordingMailer::failing_for(&["u1@x.com"]);
    let summary = ReminderDispatcher::new(&repo, &users, &failing, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert_eq!(summary.sent_count(), 1);
    assert_eq!(summary.failed_count(), 1);
    let failed = &summary.outcomes[0];
    assert_eq!(failed.task_id, "flaky");
    assert!(matches!(
        failed.outcome,
        DispatchOutcome::Failed(FailureReason::Mail(_))
    ));
    assert!(!failed.last_chance);
    assert!(!load(&conn, "flaky").sent_15);
    assert!(load(&conn, "fine").sent_15);

    let next_tick = now + Duration::minutes(1);
    let healthy = RecordingMailer::new();
    let retry = ReminderDispatcher::new(&repo, &users, &healthy, ReminderRenderer::new())
        .with_clock(FixedClock(next_tick))
        .run();

    assert_eq!(retry.tier_task_ids(ReminderTier::Near), vec!["flaky"]);
    assert_eq!(healthy.sent_count(), 1);
    assert!(load(&conn, "flaky").sent_15);
}

#[test]
fn failure_on_last_tick_in_window_is_reported_as_final_miss() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::always_failing();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "closing", "u1", now, Duration::seconds(40));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .with_tick_interval(std::time::Duration::from_secs(60))
        .run();

    assert_eq!(summary.failed_count(), 1);
    assert!(summary.outcomes[0].last_chance);
    assert!(!load(&conn, "closing").sent_15);
}

#[test]
fn owner_without_email_is_skipped_and_not_latched() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_task(&conn, "orphan", "ghost", now, Duration::minutes(5));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert_eq!(
        summary.outcomes[0].outcome,
        DispatchOutcome::Skipped(SkipReason::MissingRecipient)
    );
    assert_eq!(summary.staged, 0);
    assert_eq!(mailer.sent_count(), 0);
    assert!(!load(&conn, "orphan").sent_15);
}

#[test]
fn commit_failure_drops_all_latches_and_next_run_resends() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "a", "u1", now, Duration::minutes(4));
    seed_task(&conn, "b", "u1", now, Duration::minutes(6));
    conn.execute_batch(
        "CREATE TRIGGER reject_latch BEFORE UPDATE ON tasks
         WHEN NEW.id = 'b'
         BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
    )
    .unwrap();

    let dispatcher = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now));

    let failed = dispatcher.run();
    assert_eq!(failed.sent_count(), 2);
    assert_eq!(failed.staged, 2);
    assert_eq!(failed.committed, 0);
    assert!(failed.commit_failure.is_some());
    assert!(!load(&conn, "a").sent_15);
    assert!(!load(&conn, "b").sent_15);

    conn.execute_batch("DROP TRIGGER reject_latch;").unwrap();

    let recovered = dispatcher.run();
    assert_eq!(recovered.sent_count(), 2);
    assert_eq!(recovered.committed, 2);
    assert_eq!(mailer.sent_count(), 4);
    assert!(load(&conn, "a").sent_15);
    assert!(load(&conn, "b").sent_15);
}

#[test]
fn malformed_row_fails_alone_and_rest_of_tier_still_sends() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTaskRepository::new(&conn);
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "good", "u1", now, Duration::minutes(5));
    conn.execute(
        "INSERT INTO tasks (id, text, due_at, owner_id) VALUES ('ownerless', 'x', ?1, '');",
        [(now + Duration::minutes(6)).timestamp_millis()],
    )
    .unwrap();

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert!(summary.query_failures.is_empty());
    assert_eq!(summary.sent_count(), 1);
    assert_eq!(summary.failed_count(), 1);
    let rejected = summary
        .outcomes
        .iter()
        .find(|outcome| outcome.task_id == "ownerless")
        .unwrap();
    assert!(matches!(
        rejected.outcome,
        DispatchOutcome::Failed(FailureReason::InvalidRecord(_))
    ));
    assert_eq!(mailer.sent_count(), 1);
    assert!(load(&conn, "good").sent_15);
}

/// Repository whose near-tier query always fails.
struct NearQueryOutage<'conn> {
    inner: SqliteTaskRepository<'conn>,
}

impl TaskRepository for NearQueryOutage<'_> {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        self.inner.create_task(task)
    }

    fn get_task(&self, id: &str) -> RepoResult<Option<Task>> {
        self.inner.get_task(id)
    }

    fn query_reminder_candidates(
        &self,
        tier: ReminderTier,
        window: &ReminderWindow,
    ) -> RepoResult<CandidateBatch> {
        if tier == ReminderTier::Near {
            return Err(RepoError::InvalidData("index unavailable".to_string()));
        }
        self.inner.query_reminder_candidates(tier, window)
    }

    fn commit_sent_flags(&self, updates: &[SentFlagUpdate]) -> RepoResult<usize> {
        self.inner.commit_sent_flags(updates)
    }
}

#[test]
fn query_failure_skips_only_the_affected_tier() {
    let conn = open_db_in_memory().unwrap();
    let repo = NearQueryOutage {
        inner: SqliteTaskRepository::new(&conn),
    };
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "near", "u1", now, Duration::minutes(5));
    seed_task(&conn, "far", "u1", now, Duration::minutes(20));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert_eq!(summary.query_failures.len(), 1);
    assert_eq!(summary.query_failures[0].tier, ReminderTier::Near);
    assert_eq!(summary.tier_task_ids(ReminderTier::Far), vec!["far"]);
    assert!(!load(&conn, "near").sent_15);
    assert!(load(&conn, "far").sent_30);
}

/// Repository that returns the same task for both tiers.
struct OverlappingRepo<'conn> {
    inner: SqliteTaskRepository<'conn>,
    task_id: &'static str,
}

impl TaskRepository for OverlappingRepo<'_> {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        self.inner.create_task(task)
    }

    fn get_task(&self, id: &str) -> RepoResult<Option<Task>> {
        self.inner.get_task(id)
    }

    fn query_reminder_candidates(
        &self,
        _tier: ReminderTier,
        _window: &ReminderWindow,
    ) -> RepoResult<CandidateBatch> {
        let tasks: Vec<Task> = self.inner.get_task(self.task_id)?.into_iter().collect();
        Ok(CandidateBatch::from(tasks))
    }

    fn commit_sent_flags(&self, updates: &[SentFlagUpdate]) -> RepoResult<usize> {
        self.inner.commit_sent_flags(updates)
    }
}

#[test]
fn task_returned_for_both_tiers_is_mailed_once() {
    let conn = open_db_in_memory().unwrap();
    let repo = OverlappingRepo {
        inner: SqliteTaskRepository::new(&conn),
        task_id: "t1",
    };
    let users = SqliteUserDirectory::new(&conn);
    let mailer = RecordingMailer::new();
    let now = fixed_now();

    seed_user(&conn, "u1", "u1@x.com");
    seed_task(&conn, "t1", "u1", now, Duration::minutes(5));

    let summary = ReminderDispatcher::new(&repo, &users, &mailer, ReminderRenderer::new())
        .with_clock(FixedClock(now))
        .run();

    assert_eq!(summary.sent_count(), 1);
    assert_eq!(
        summary.outcomes[1].outcome,
        DispatchOutcome::Skipped(SkipReason::AlreadyStaged)
    );
    assert_eq!(mailer.sent_count(), 1);
    let task = load(&conn, "t1");
    assert!(task.sent_15 && !task.sent_30);
}
