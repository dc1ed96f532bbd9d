//! Session Layer
//!
//! Per-user puzzle sessions and their deadline watchers.

pub mod deadline;
pub mod manager;

pub use deadline::{DeadlineHandle, DeadlineScheduler};
pub use manager::{GuessResult, LoginSummary, PerkResult, PuzzleStart, SessionManager};
