#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::HashSet;
use taskbell_core::{
    MailError, Mailer, OutboundEmail, SqliteTaskRepository, SqliteUserDirectory, Task,
    TaskRepository, UserRecord,
};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
}

pub fn seed_user(conn: &Connection, uid: &str, email: &str) {
    SqliteUserDirectory::new(conn)
        .upsert_user(&UserRecord::new(uid, email))
        .unwrap();
}

/// Inserts an open task due `offset` after `now`.
pub fn seed_task(conn: &Connection, id: &str, owner: &str, now: DateTime<Utc>, offset: Duration) -> Task {
    let task = Task::with_id(id, owner, format!("task {id}")).due(now + offset);
    SqliteTaskRepository::new(conn).create_task(&task).unwrap();
    task
}

pub fn load(conn: &Connection, id: &str) -> Task {
    SqliteTaskRepository::new(conn)
        .get_task(id)
        .unwrap()
        .expect("task should exist")
}

/// Mailer stub that records deliveries and can fail selected recipients.
#[derive(Default)]
pub struct RecordingMailer {
    sent: RefCell<Vec<OutboundEmail>>,
    failing: HashSet<String>,
    fail_all: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.borrow().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        if self.fail_all || self.failing.contains(&email.to) {
            return Err(MailError::Rejected("simulated transport outage".to_string()));
        }
        self.sent.borrow_mut().push(email.clone());
        Ok(())
    }
}
