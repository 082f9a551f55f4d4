//! User directory used to resolve task owners to email addresses.
//!
//! # Responsibility
//! - Resolve an owner id to a deliverable address.
//! - Store the profile subset needed for that lookup.
//!
//! # Invariants
//! - `resolve_email` never returns a blank address.

use crate::repo::task_repo::{millis_to_utc, RepoResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// Profile fields kept for reminder delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: Some(email.into()),
            display_name: None,
            updated_at: None,
        }
    }
}

/// Identity lookup consumed by the dispatcher and manual trigger.
pub trait EmailDirectory {
    /// `Ok(None)` when the owner is unknown or has no usable address.
    fn resolve_email(&self, owner_id: &str) -> RepoResult<Option<String>>;
}

impl<T: EmailDirectory + ?Sized> EmailDirectory for &T {
    fn resolve_email(&self, owner_id: &str) -> RepoResult<Option<String>> {
        (**self).resolve_email(owner_id)
    }
}

/// SQLite-backed user directory.
pub struct SqliteUserDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserDirectory<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or replaces the profile fields of one user.
    pub fn upsert_user(&self, user: &UserRecord) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO users (uid, email, display_name)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(uid) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                user.uid.as_str(),
                user.email.as_deref(),
                user.display_name.as_deref()
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, uid: &str) -> RepoResult<Option<UserRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT uid, email, display_name, updated_at FROM users WHERE uid = ?1;",
                [uid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((uid, email, display_name, updated_at)) => Ok(Some(UserRecord {
                uid,
                email,
                display_name,
                updated_at: Some(millis_to_utc(updated_at, "users.updated_at")?),
            })),
            None => Ok(None),
        }
    }
}

impl EmailDirectory for SqliteUserDirectory<'_> {
    fn resolve_email(&self, owner_id: &str) -> RepoResult<Option<String>> {
        let email = self.get_user(owner_id)?.and_then(|user| user.email);
        Ok(email
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }
}
