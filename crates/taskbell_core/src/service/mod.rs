//! Reminder use-case services.
//!
//! # Responsibility
//! - Render and deliver reminder emails.
//! - Orchestrate scheduled sweeps and on-demand test sends over the
//!   repository contracts.
//!
//! # Invariants
//! - Services receive their mailer, repository and directory explicitly;
//!   nothing here holds process-global transport state.

pub mod clock;
pub mod dispatcher;
pub mod mailer;
pub mod manual_trigger;
pub mod render;
