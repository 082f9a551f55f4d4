//! Reminder tiers, due-time windows and the per-tier latch.
//!
//! # Invariants
//! - Tier windows are half-open `(start, end]` and disjoint for one `now`.
//! - The far window starts where the near window ends.
//! - `ReminderLatch::Sent` is terminal.

use crate::model::task::Task;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Urgency level of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ReminderTier {
    /// Due within 15 minutes.
    Near,
    /// Due within 30 minutes but not within 15.
    #[default]
    Far,
}

impl ReminderTier {
    /// Tiers in processing order, most urgent first.
    pub const ALL: [ReminderTier; 2] = [ReminderTier::Near, ReminderTier::Far];

    /// Lead time in minutes before `due_at`.
    pub fn minutes(self) -> u32 {
        match self {
            Self::Near => 15,
            Self::Far => 30,
        }
    }

    pub fn lead_time(self) -> Duration {
        Duration::minutes(i64::from(self.minutes()))
    }

    /// The next more urgent tier, if any.
    fn more_urgent(self) -> Option<Self> {
        match self {
            Self::Near => None,
            Self::Far => Some(Self::Near),
        }
    }

    /// Due-time window selected by this tier at `now`.
    ///
    /// Near is `(now, now+15m]`; far is `(now+15m, now+30m]`.
    pub fn window_at(self, now: DateTime<Utc>) -> ReminderWindow {
        let start = match self.more_urgent() {
            Some(previous) => now + previous.lead_time(),
            None => now,
        };
        ReminderWindow {
            start,
            end: now + self.lead_time(),
        }
    }
}

impl Display for ReminderTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}min", self.minutes())
    }
}

impl From<ReminderTier> for u32 {
    fn from(value: ReminderTier) -> Self {
        value.minutes()
    }
}

impl TryFrom<u32> for ReminderTier {
    type Error = UnknownTierError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            15 => Ok(Self::Near),
            30 => Ok(Self::Far),
            other => Err(UnknownTierError(other)),
        }
    }
}

/// Tier value outside the supported `15 | 30`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTierError(pub u32);

impl Display for UnknownTierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsupported reminder tier `{}`; expected 15|30", self.0)
    }
}

impl Error for UnknownTierError {}

/// Half-open `(start, end]` interval of due instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReminderWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at <= self.end
    }
}

/// Notification state for one task-tier pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderLatch {
    Unsent,
    Sent,
}

impl ReminderLatch {
    /// Transition taken after a confirmed send.
    pub fn mark_sent(self) -> Self {
        Self::Sent
    }

    pub fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// One reminder about to be rendered and mailed. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub tier: ReminderTier,
    pub task: Task,
    pub recipient: String,
}
