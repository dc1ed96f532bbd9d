//! Puzzle Session State
//!
//! Per-user play context and the single teardown path shared by every way a
//! puzzle can end.
//!
//! ```text
//! Idle ──start──▶ Active ──▶ { Success | Failure | TimedOut | Aborted } ──▶ Idle
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::words::{Difficulty, WordBank};
use crate::session::deadline::DeadlineHandle;

// =============================================================================
// USER IDENTITY
// =============================================================================

/// Platform user identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Guild-like scope that owns an XP account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u64);

/// A user within a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserRef {
    /// User.
    pub user: UserId,
    /// Scope.
    pub scope: ScopeId,
}

impl UserRef {
    /// Create from raw ids.
    pub const fn new(user: u64, scope: u64) -> Self {
        Self { user: UserId(user), scope: ScopeId(scope) }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user.0, self.scope.0)
    }
}

/// Unique puzzle identifier.
pub type PuzzleId = Uuid;

/// Longest span a deadline may lie ahead of the instant it is computed from.
pub const MAX_DEADLINE_SPAN: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + by`, capped at [`MAX_DEADLINE_SPAN`] instead of overflowing.
fn deadline_after(from: Instant, by: Duration) -> Instant {
    from.checked_add(by.min(MAX_DEADLINE_SPAN)).unwrap_or(from)
}

// =============================================================================
// OUTCOME
// =============================================================================

/// How a puzzle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Correct guess, Bypass or a lucky Overclock.
    Success,
    /// Attempts exhausted.
    Failure,
    /// Deadline passed.
    TimedOut,
    /// Ended by the player, a restart or a logout.
    Aborted,
}

impl Outcome {
    /// Whether the answer is shown to the player.
    pub fn reveals_answer(self) -> bool {
        matches!(self, Outcome::Failure | Outcome::TimedOut)
    }
}

// =============================================================================
// PUZZLE
// =============================================================================

/// One scrambled word awaiting a guess.
#[derive(Debug, Clone)]
pub struct Puzzle {
    /// Identity, fresh per start.
    pub id: PuzzleId,
    /// Answer.
    pub word: String,
    /// Text shown to the player.
    pub scrambled: String,
    /// Tier.
    pub difficulty: Difficulty,
    /// Guesses left.
    pub attempts_remaining: u8,
    /// Start instant.
    pub started_at: Instant,
    /// Expiry instant. Moved forward by Stall.
    pub deadline: Instant,
    /// Perk uses allowed.
    pub perk_limit: u8,
    /// Perk uses spent.
    pub perks_used: u8,
    /// Answer positions disclosed by Reveal.
    pub revealed: BTreeSet<usize>,
}

impl Puzzle {
    /// Create a puzzle starting now.
    pub fn new(
        word: String,
        scrambled: String,
        difficulty: Difficulty,
        duration: Duration,
        attempts: u8,
        perk_limit: u8,
    ) -> Self {
        let started_at = Instant::now();
        Self {
            id: Uuid::new_v4(),
            word,
            scrambled,
            difficulty,
            attempts_remaining: attempts,
            started_at,
            deadline: deadline_after(started_at, duration),
            perk_limit,
            perks_used: 0,
            revealed: BTreeSet::new(),
        }
    }

    /// Push the deadline back by `by`. Returns the new deadline.
    pub fn extend(&mut self, by: Duration) -> Instant {
        self.deadline = deadline_after(self.deadline, by);
        self.deadline
    }

    /// Case-insensitive comparison against the answer.
    pub fn matches(&self, guess: &str) -> bool {
        guess.trim().eq_ignore_ascii_case(&self.word)
    }

    /// Perk uses left.
    pub fn perks_remaining(&self) -> u8 {
        self.perk_limit.saturating_sub(self.perks_used)
    }

    /// Answer positions not yet disclosed.
    pub fn hidden_positions(&self) -> Vec<usize> {
        (0..self.word.chars().count())
            .filter(|i| !self.revealed.contains(i))
            .collect()
    }

    /// Answer with undisclosed letters masked.
    pub fn masked(&self) -> String {
        self.word
            .chars()
            .enumerate()
            .map(|(i, c)| if self.revealed.contains(&i) { c } else { '•' })
            .collect()
    }

    /// Time until the deadline.
    pub fn time_left(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Record of a finished puzzle, produced exactly once per puzzle.
#[derive(Debug, Clone)]
pub struct Concluded {
    /// Puzzle that ended.
    pub puzzle_id: PuzzleId,
    /// How it ended.
    pub outcome: Outcome,
    /// Answer. Only shown to the player when the outcome reveals it.
    pub word: String,
    /// Tier.
    pub difficulty: Difficulty,
    /// Time from start to end.
    pub elapsed: Duration,
}

impl Concluded {
    /// Answer to disclose, if the outcome allows it.
    pub fn revealed_answer(&self) -> Option<&str> {
        self.outcome.reveals_answer().then_some(self.word.as_str())
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// A logged-in user's play context.
#[derive(Debug)]
pub struct PuzzleSession {
    /// Owner.
    pub user: UserRef,
    /// Display label chosen at login.
    pub alias: String,
    /// Active puzzle, if any.
    pub puzzle: Option<Puzzle>,
    /// Watcher for the active puzzle's deadline.
    watcher: Option<DeadlineHandle>,
    /// Set once the session is removed; no new puzzle may start.
    closed: bool,
}

impl PuzzleSession {
    /// Create an idle session.
    pub fn new(user: UserRef, alias: impl Into<String>) -> Self {
        Self {
            user,
            alias: alias.into(),
            puzzle: None,
            watcher: None,
            closed: false,
        }
    }

    /// Whether a puzzle is in progress.
    pub fn is_active(&self) -> bool {
        self.puzzle.is_some()
    }

    /// Whether the session was logged out.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the session as logged out.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Install a new puzzle and its watcher. The session must be idle.
    pub fn begin(&mut self, puzzle: Puzzle, watcher: DeadlineHandle) {
        debug_assert!(self.puzzle.is_none(), "previous puzzle must be concluded first");
        self.puzzle = Some(puzzle);
        self.watcher = Some(watcher);
    }

    /// End the active puzzle.
    ///
    /// Stops the deadline watcher, releases the word and clears the puzzle.
    /// Returns `None` if the session is already idle, so the first of several
    /// racing transitions wins and the rest are no-ops.
    ///
    /// `TimedOut` is only produced by the watcher itself, which cannot await
    /// its own handle; it is detached instead.
    pub async fn conclude(&mut self, outcome: Outcome, words: &Mutex<WordBank>) -> Option<Concluded> {
        let puzzle = self.puzzle.take()?;

        if let Some(watcher) = self.watcher.take() {
            if outcome == Outcome::TimedOut {
                watcher.detach();
            } else {
                watcher.cancel().await;
            }
        }

        let released = words.lock().await.release(&puzzle.word);
        debug_assert!(released, "active word must be registered");

        Some(Concluded {
            puzzle_id: puzzle.id,
            outcome,
            word: puzzle.word,
            difficulty: puzzle.difficulty,
            elapsed: puzzle.started_at.elapsed(),
        })
    }
}

/// Read-only view of an active puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PuzzleView {
    /// Puzzle identity.
    pub puzzle_id: PuzzleId,
    /// Scrambled text.
    pub scrambled: String,
    /// Tier.
    pub difficulty: Difficulty,
    /// Guesses left.
    pub attempts_remaining: u8,
    /// Perk uses left.
    pub perks_remaining: u8,
    /// Answer with undisclosed letters masked.
    pub masked: String,
    /// Whole seconds until the deadline.
    pub seconds_left: u64,
}

impl From<&Puzzle> for PuzzleView {
    fn from(puzzle: &Puzzle) -> Self {
        Self {
            puzzle_id: puzzle.id,
            scrambled: puzzle.scrambled.clone(),
            difficulty: puzzle.difficulty,
            attempts_remaining: puzzle.attempts_remaining,
            perks_remaining: puzzle.perks_remaining(),
            masked: puzzle.masked(),
            seconds_left: puzzle.time_left(Instant::now()).as_secs(),
        }
    }
}
