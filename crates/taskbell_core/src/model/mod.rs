//! Domain model for due-soon task reminders.
//!
//! # Responsibility
//! - Define the task record shape the reminder core reads.
//! - Define urgency tiers, their time windows and the per-tier latch.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId`.
//! - Latch flags only ever move from unsent to sent.

pub mod reminder;
pub mod task;
