//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the data access contracts the reminder core consumes.
//! - Isolate SQLite query details from dispatch orchestration.
//!
//! # Invariants
//! - Latch writes only ever set flags; no repository path clears them.
//! - Missing rows surface as `Ok(None)` or are skipped; errors mean the
//!   store itself failed or held data the core cannot read.

pub mod task_repo;
pub mod user_repo;
