//! Error Types
//!
//! Every condition surfaced to a player is an expected, recoverable
//! [`GameError`]. Storage failures are retried inside the store and
//! otherwise collapse into [`GameError::StorageUnavailable`].

use std::time::Duration;

/// User-facing game errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The user has no session.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The session is idle.
    #[error("No active puzzle")]
    NoActivePuzzle,

    /// The action is rate limited.
    #[error("On cooldown for another {}s", remaining.as_secs().max(1))]
    Cooldown {
        /// Time left before the action is allowed again.
        remaining: Duration,
    },

    /// Every word of the requested tier is held by a live puzzle.
    #[error("No puzzle words available, try again shortly")]
    PoolExhausted,

    /// All perk uses for this puzzle are spent.
    #[error("No perks remaining for this puzzle")]
    PerkExhausted,

    /// The user's level is below the perk requirement.
    #[error("Requires level {required}")]
    LevelLocked {
        /// Minimum level for the perk.
        required: u8,
    },

    /// Malformed request (empty guess and similar).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistent store could not complete the request.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Persistent store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Blocking task failed to complete.
    #[error("Store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Failed to prepare the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        GameError::StorageUnavailable(err.to_string())
    }
}

/// Result alias for game operations.
pub type GameResult<T> = Result<T, GameError>;
