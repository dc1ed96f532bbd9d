//! Game Logic Module
//!
//! Per-user puzzle state, perk rules and the events the core emits.
//!
//! ## Module Structure
//!
//! - `puzzle`: User identity, puzzle record, session, teardown
//! - `perks`: Level-gated perk rules
//! - `events`: User-facing events and notification sinks
//! - `hint`: Best-effort external hint text

pub mod puzzle;
pub mod perks;
pub mod events;
pub mod hint;

// Re-export key types
pub use puzzle::{Concluded, Outcome, Puzzle, PuzzleId, PuzzleSession, PuzzleView, ScopeId, UserId, UserRef};
pub use perks::{PerkEngine, PerkKind};
pub use events::{ChannelSink, GameEvent, Notification, NotificationSink, TracingSink};
pub use hint::{HintError, HintProvider, NoHints, TemplateHints};
