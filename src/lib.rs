//! # Hackshell
//!
//! Chat-bot core for timed scrambled-word puzzles with an XP and level ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         HACKSHELL                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Word primitives                           │
//! │  ├── words.rs    - Vocabularies, rotation, reservation       │
//! │  └── scramble.rs - Letter scrambling                         │
//! │                                                              │
//! │  game/           - Puzzle rules                              │
//! │  ├── puzzle.rs   - Identity, puzzle, session, teardown       │
//! │  ├── perks.rs    - Level-gated perks                         │
//! │  ├── events.rs   - User-facing events and sinks              │
//! │  └── hint.rs     - Best-effort hint text                     │
//! │                                                              │
//! │  session/        - Concurrency                               │
//! │  ├── manager.rs  - Player commands, session map              │
//! │  └── deadline.rs - Per-puzzle deadline watchers              │
//! │                                                              │
//! │  ledger/         - Persistence                               │
//! │  ├── levels.rs   - Level thresholds                          │
//! │  ├── store.rs    - SQLite accounts and logs                  │
//! │  └── service.rs  - Award rules                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Puzzle Lifecycle
//!
//! Every puzzle ends exactly once, through a single teardown path that stops
//! its deadline watcher and releases its word. Whichever transition reaches
//! the session first (guess, timeout, abort, restart, logout) wins; the
//! others find the session idle and do nothing.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod game;
pub mod ledger;
pub mod session;

// Re-export commonly used types
pub use config::GameConfig;
pub use core::words::{Difficulty, WordPool};
pub use error::{GameError, GameResult, StoreError};
pub use game::events::{GameEvent, Notification, NotificationSink};
pub use game::perks::PerkKind;
pub use game::puzzle::{Outcome, UserId, UserRef};
pub use ledger::{LevelStore, XpLedger};
pub use session::{GuessResult, PerkResult, SessionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
