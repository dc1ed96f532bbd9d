//! Session Manager
//!
//! Entry point for every player command. Owns the session map, the shared
//! word bank, the per-user start cooldowns and the deadline scheduler.
//!
//! Lock order is always session, then word bank. Hint calls and XP awards
//! happen after the session lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::GameConfig;
use crate::core::scramble::scramble;
use crate::core::words::{Difficulty, WordBank, WordPool};
use crate::error::{GameError, GameResult};
use crate::game::events::{GameEvent, Notification, NotificationSink};
use crate::game::hint::{fetch_hint, HintProvider, NoHints};
use crate::game::perks::{PerkEngine, PerkKind};
use crate::game::puzzle::{Concluded, Outcome, Puzzle, PuzzleId, PuzzleSession, PuzzleView, UserId, UserRef};
use crate::ledger::service::{HackAward, XpLedger};
use crate::session::deadline::DeadlineScheduler;

// =============================================================================
// RESULTS
// =============================================================================

/// Outcome of a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginSummary {
    /// Login bonus applied.
    pub bonus_xp: u64,
    /// Level after the bonus.
    pub level: u8,
}

/// A freshly started puzzle.
#[derive(Debug, Clone)]
pub struct PuzzleStart {
    /// Puzzle identity.
    pub puzzle_id: PuzzleId,
    /// Text shown to the player.
    pub scrambled: String,
    /// Tier.
    pub difficulty: Difficulty,
    /// Time budget.
    pub duration: Duration,
    /// Expiry instant.
    pub deadline: Instant,
}

/// Result of a guess.
#[derive(Debug, Clone)]
pub enum GuessResult {
    /// Correct.
    Solved {
        /// Time taken.
        elapsed: Duration,
        /// XP credit, `None` if storage was unavailable.
        award: Option<HackAward>,
    },
    /// Wrong, attempts remain.
    Wrong {
        /// Guesses left.
        attempts_left: u8,
        /// Optional hint text.
        hint: Option<String>,
    },
    /// Wrong and out of attempts.
    Failed {
        /// The answer.
        answer: String,
    },
}

/// Result of a perk.
#[derive(Debug, Clone)]
pub enum PerkResult {
    /// Letters disclosed.
    Revealed {
        /// Newly disclosed positions.
        positions: Vec<usize>,
        /// Answer with undisclosed letters masked.
        masked: String,
    },
    /// Every letter is already visible; nothing was spent.
    NothingToReveal,
    /// Deadline extended.
    Stalled {
        /// Time left after the extension.
        time_left: Duration,
    },
    /// Solved by Bypass or a winning Overclock.
    Solved {
        /// Perk that solved it.
        perk: PerkKind,
        /// XP credit, `None` if storage was unavailable.
        award: Option<HackAward>,
    },
    /// Overclock roll lost.
    OverclockFailed {
        /// XP removed.
        penalty: u64,
    },
}

// =============================================================================
// MANAGER
// =============================================================================

/// Coordinates sessions, puzzles, perks and awards.
pub struct SessionManager {
    config: GameConfig,
    /// Live sessions by user.
    sessions: RwLock<BTreeMap<UserId, Arc<Mutex<PuzzleSession>>>>,
    /// Last start per user, kept while its cooldown runs. Survives relogin.
    start_times: Mutex<HashMap<UserId, Instant>>,
    words: Arc<Mutex<WordBank>>,
    scheduler: DeadlineScheduler,
    rng: Mutex<StdRng>,
    perks: PerkEngine,
    ledger: Arc<XpLedger>,
    sink: Arc<dyn NotificationSink>,
    hints: Arc<dyn HintProvider>,
}

impl SessionManager {
    /// Create a manager with an entropy-seeded word pool and no hints.
    pub fn new(config: GameConfig, ledger: Arc<XpLedger>, sink: Arc<dyn NotificationSink>) -> Self {
        let words = Arc::new(Mutex::new(WordBank::default()));
        let scheduler = DeadlineScheduler::new(config.puzzle.poll_interval, words.clone(), sink.clone());
        let perks = PerkEngine::new(config.perks.clone());

        Self {
            config,
            sessions: RwLock::new(BTreeMap::new()),
            start_times: Mutex::new(HashMap::new()),
            words,
            scheduler,
            rng: Mutex::new(StdRng::from_entropy()),
            perks,
            ledger,
            sink,
            hints: Arc::new(NoHints),
        }
    }

    /// Use a hint provider.
    pub fn with_hints(mut self, hints: Arc<dyn HintProvider>) -> Self {
        self.hints = hints;
        self
    }

    /// Use a specific word pool. Call before any puzzle starts.
    pub fn with_word_pool(mut self, pool: WordPool) -> Self {
        self.words = Arc::new(Mutex::new(WordBank::new(pool)));
        self.scheduler = DeadlineScheduler::new(self.config.puzzle.poll_interval, self.words.clone(), self.sink.clone());
        self
    }

    /// Seed the scramble, reveal and overclock randomness.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// XP ledger.
    pub fn ledger(&self) -> &XpLedger {
        &self.ledger
    }

    // =========================================================================
    // LOGIN / LOGOUT
    // =========================================================================

    /// Open a fresh session, replacing any existing one.
    #[instrument(skip(self))]
    pub async fn login(&self, user: UserRef, alias: &str) -> GameResult<LoginSummary> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(GameError::InvalidInput("alias must not be empty".into()));
        }

        let fresh = Arc::new(Mutex::new(PuzzleSession::new(user, alias)));
        let previous = self.sessions.write().await.insert(user.user, fresh);
        if let Some(previous) = previous {
            debug!("Replacing existing session of {}", user);
            self.teardown(previous, true).await;
        }

        let summary = match self.ledger.record_online(user).await {
            Ok(award) => LoginSummary { bonus_xp: award.applied, level: award.account.level },
            Err(e) => {
                warn!("Login bonus for {} unavailable: {}", user, e);
                LoginSummary { bonus_xp: 0, level: self.level_or_zero(user).await }
            }
        };

        info!("{} logged in as {} (level {})", user, alias, summary.level);
        self.notify(
            user,
            GameEvent::LoggedIn {
                alias: alias.to_string(),
                bonus_xp: summary.bonus_xp,
                level: summary.level,
            },
        );
        Ok(summary)
    }

    /// Close a session. An active puzzle is dropped without revealing it.
    #[instrument(skip(self))]
    pub async fn logout(&self, user: UserId) -> GameResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&user)
            .ok_or(GameError::NotLoggedIn)?;

        let owner = self.teardown(session, false).await;
        info!("{} logged out", owner);
        self.notify(owner, GameEvent::LoggedOut);
        Ok(())
    }

    /// Abort any active puzzle, then log out.
    pub async fn end_full_session(&self, user: UserId) -> GameResult<()> {
        match self.abort(user).await {
            Ok(()) | Err(GameError::NoActivePuzzle) => {}
            Err(e) => return Err(e),
        }
        self.logout(user).await
    }

    /// Close a removed session and end its puzzle.
    async fn teardown(&self, session: Arc<Mutex<PuzzleSession>>, announce: bool) -> UserRef {
        let mut guard = session.lock().await;
        guard.close();
        let owner = guard.user;
        let done = guard.conclude(Outcome::Aborted, &self.words).await;
        drop(guard);

        if let Some(done) = done {
            debug!("Dropped puzzle {} of {}", done.puzzle_id, owner);
            if announce {
                self.notify(owner, GameEvent::Aborted);
            }
        }
        owner
    }

    // =========================================================================
    // PUZZLES
    // =========================================================================

    /// Start a puzzle, ending any puzzle in progress.
    #[instrument(skip(self))]
    pub async fn start_puzzle(&self, user: UserId, difficulty: Difficulty) -> GameResult<PuzzleStart> {
        let session = self.session(user).await?;
        self.check_start_cooldown(user).await?;

        let mut guard = session.lock().await;
        if guard.is_closed() {
            return Err(GameError::NotLoggedIn);
        }
        let owner = guard.user;

        if let Some(done) = guard.conclude(Outcome::Aborted, &self.words).await {
            debug!("Restart ended puzzle {} of {}", done.puzzle_id, owner);
            self.notify(owner, GameEvent::Aborted);
        }

        let level = self.level_or_zero(owner).await;
        let word = self
            .words
            .lock()
            .await
            .draw(difficulty)
            .ok_or(GameError::PoolExhausted)?;
        let scrambled = scramble(&word, &mut *self.rng.lock().await);

        #[cfg(feature = "debug-tracing")]
        debug!(answer = %word, "Puzzle answer for {}", owner);

        let duration = self.config.puzzle.duration_for(difficulty);
        let puzzle = Puzzle::new(
            word,
            scrambled.clone(),
            difficulty,
            duration,
            self.config.puzzle.max_attempts,
            self.perks.perk_limit_for(level),
        );
        let start = PuzzleStart {
            puzzle_id: puzzle.id,
            scrambled: scrambled.clone(),
            difficulty,
            duration,
            deadline: puzzle.deadline,
        };

        let watcher = self.scheduler.schedule(session.clone(), puzzle.id);
        guard.begin(puzzle, watcher);
        drop(guard);

        info!("{} started {} puzzle {}", owner, difficulty, start.puzzle_id);
        self.notify(
            owner,
            GameEvent::PuzzleStarted {
                scramble: scrambled,
                duration_secs: duration.as_secs(),
                difficulty,
            },
        );
        Ok(start)
    }

    /// Check a guess against the active puzzle.
    #[instrument(skip(self, guess))]
    pub async fn submit_guess(&self, user: UserId, guess: &str) -> GameResult<GuessResult> {
        let session = self.session(user).await?;
        let mut guard = session.lock().await;
        let owner = guard.user;

        let puzzle = guard.puzzle.as_mut().ok_or(GameError::NoActivePuzzle)?;
        let guess = guess.trim();
        if guess.is_empty() {
            return Err(GameError::InvalidInput("guess must not be empty".into()));
        }

        if puzzle.matches(guess) {
            let done = guard
                .conclude(Outcome::Success, &self.words)
                .await
                .ok_or(GameError::NoActivePuzzle)?;
            drop(guard);

            let award = self.reward_success(owner, &done).await;
            return Ok(GuessResult::Solved { elapsed: done.elapsed, award });
        }

        puzzle.attempts_remaining = puzzle.attempts_remaining.saturating_sub(1);
        let attempts_left = puzzle.attempts_remaining;

        if attempts_left == 0 {
            let done = guard
                .conclude(Outcome::Failure, &self.words)
                .await
                .ok_or(GameError::NoActivePuzzle)?;
            drop(guard);

            info!("{} failed puzzle {}", owner, done.puzzle_id);
            if let Err(e) = self.ledger.record_hack_failure(owner).await {
                warn!("Failure XP for {} not recorded: {}", owner, e);
            }
            self.notify(owner, GameEvent::Failure { answer: done.word.clone() });
            return Ok(GuessResult::Failed { answer: done.word });
        }

        let scrambled = puzzle.scrambled.clone();
        drop(guard);

        let hint = fetch_hint(self.hints.as_ref(), &scrambled, attempts_left, self.config.puzzle.hint_timeout).await;
        self.notify(owner, GameEvent::WrongGuess { attempts_left, hint: hint.clone() });
        Ok(GuessResult::Wrong { attempts_left, hint })
    }

    /// Abandon the active puzzle without revealing it.
    #[instrument(skip(self))]
    pub async fn abort(&self, user: UserId) -> GameResult<()> {
        let session = self.session(user).await?;
        let mut guard = session.lock().await;
        let owner = guard.user;
        let done = guard
            .conclude(Outcome::Aborted, &self.words)
            .await
            .ok_or(GameError::NoActivePuzzle)?;
        drop(guard);

        info!("{} aborted puzzle {}", owner, done.puzzle_id);
        self.notify(owner, GameEvent::Aborted);
        Ok(())
    }

    // =========================================================================
    // PERKS
    // =========================================================================

    /// Apply a perk to the active puzzle.
    #[instrument(skip(self))]
    pub async fn use_perk(&self, user: UserId, kind: PerkKind) -> GameResult<PerkResult> {
        let session = self.session(user).await?;
        let mut guard = session.lock().await;
        let owner = guard.user;

        if guard.puzzle.is_none() {
            return Err(GameError::NoActivePuzzle);
        }
        let level = self.level_or_zero(owner).await;
        let puzzle = guard.puzzle.as_mut().ok_or(GameError::NoActivePuzzle)?;

        if let Err(e) = self.perks.check(kind, level, puzzle) {
            drop(guard);
            return Err(self.deny(owner, kind, e));
        }

        match kind {
            PerkKind::Reveal => {
                let revealed = self.perks.reveal(puzzle, &mut *self.rng.lock().await);
                let masked = puzzle.masked();
                drop(guard);

                match revealed {
                    Some(positions) => {
                        debug!("{} revealed {:?}", owner, positions);
                        self.notify(owner, GameEvent::PerkApplied { perk: kind, detail: masked.clone() });
                        Ok(PerkResult::Revealed { positions, masked })
                    }
                    None => {
                        self.notify(
                            owner,
                            GameEvent::PerkDenied { perk: kind, reason: "nothing left to reveal".into() },
                        );
                        Ok(PerkResult::NothingToReveal)
                    }
                }
            }

            PerkKind::Stall => {
                let deadline = self.perks.stall(puzzle);
                let time_left = deadline.saturating_duration_since(Instant::now());
                drop(guard);

                let extension = self.perks.config().stall_extension;
                self.notify(
                    owner,
                    GameEvent::PerkApplied { perk: kind, detail: format!("+{}s", extension.as_secs()) },
                );
                Ok(PerkResult::Stalled { time_left })
            }

            PerkKind::Bypass => {
                let now = Utc::now();
                let last_used = match self.ledger.last_bypass_at(owner).await {
                    Ok(last_used) => last_used,
                    Err(e) => {
                        drop(guard);
                        return Err(self.deny(owner, kind, e.into()));
                    }
                };
                if let Some(remaining) = self.perks.bypass_remaining(last_used, now) {
                    drop(guard);
                    return Err(self.deny(owner, kind, GameError::Cooldown { remaining }));
                }

                let puzzle = guard.puzzle.as_mut().ok_or(GameError::NoActivePuzzle)?;
                self.perks.consume(puzzle);
                let done = guard
                    .conclude(Outcome::Success, &self.words)
                    .await
                    .ok_or(GameError::NoActivePuzzle)?;
                drop(guard);

                if let Err(e) = self.ledger.mark_bypass_used(owner, now).await {
                    warn!("Bypass use for {} not recorded: {}", owner, e);
                }
                self.notify(owner, GameEvent::PerkApplied { perk: kind, detail: "bypassed".into() });
                let award = self.reward_success(owner, &done).await;
                Ok(PerkResult::Solved { perk: kind, award })
            }

            PerkKind::Overclock => {
                let won = self.perks.roll_overclock(level, &mut *self.rng.lock().await);
                self.perks.consume(puzzle);

                if won {
                    let done = guard
                        .conclude(Outcome::Success, &self.words)
                        .await
                        .ok_or(GameError::NoActivePuzzle)?;
                    drop(guard);

                    self.notify(owner, GameEvent::PerkApplied { perk: kind, detail: "auto-solved".into() });
                    let award = self.reward_success(owner, &done).await;
                    return Ok(PerkResult::Solved { perk: kind, award });
                }
                drop(guard);

                let penalty = self.perks.config().overclock_penalty;
                let delta = -i64::try_from(penalty).unwrap_or(i64::MAX);
                if let Err(e) = self.ledger.add_xp_delta(owner, delta, "overclock_failed").await {
                    warn!("Overclock penalty for {} not recorded: {}", owner, e);
                }
                info!("{} lost an overclock roll", owner);
                self.notify(owner, GameEvent::PerkApplied { perk: kind, detail: format!("failed, -{} XP", penalty) });
                Ok(PerkResult::OverclockFailed { penalty })
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Whether the user has a session.
    pub async fn is_logged_in(&self, user: UserId) -> bool {
        self.sessions.read().await.contains_key(&user)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Words currently reserved by live puzzles.
    pub async fn active_word_count(&self) -> usize {
        self.words.lock().await.active_count()
    }

    /// Read-only view of the user's active puzzle.
    pub async fn snapshot(&self, user: UserId) -> Option<PuzzleView> {
        let session = self.sessions.read().await.get(&user).cloned()?;
        let guard = session.lock().await;
        guard.puzzle.as_ref().map(PuzzleView::from)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    async fn session(&self, user: UserId) -> GameResult<Arc<Mutex<PuzzleSession>>> {
        self.sessions
            .read()
            .await
            .get(&user)
            .cloned()
            .ok_or(GameError::NotLoggedIn)
    }

    async fn check_start_cooldown(&self, user: UserId) -> GameResult<()> {
        let cooldown = self.config.puzzle.start_cooldown;
        let now = Instant::now();
        let mut starts = self.start_times.lock().await;

        if let Some(last) = starts.get(&user) {
            let since = now.saturating_duration_since(*last);
            if since < cooldown {
                return Err(GameError::Cooldown { remaining: cooldown - since });
            }
        }
        starts.retain(|_, last| now.saturating_duration_since(*last) < cooldown);
        starts.insert(user, now);
        Ok(())
    }

    async fn level_or_zero(&self, user: UserRef) -> u8 {
        match self.ledger.level_of(user).await {
            Ok(level) => level,
            Err(e) => {
                warn!("Level lookup for {} failed, using 0: {}", user, e);
                0
            }
        }
    }

    /// Score a solved puzzle and announce it.
    async fn reward_success(&self, user: UserRef, done: &Concluded) -> Option<HackAward> {
        info!("{} solved puzzle {} in {:?}", user, done.puzzle_id, done.elapsed);

        let award = match self.ledger.record_hack_success(user, done.difficulty, done.elapsed).await {
            Ok(award) => Some(award),
            Err(e) => {
                warn!("Success XP for {} not recorded: {}", user, e);
                None
            }
        };

        let event = match &award {
            Some(a) => GameEvent::Success {
                xp_awarded: a.award.applied,
                new_level: a.award.account.level,
                leveled_up: a.award.leveled_up,
                note: a.note.clone(),
            },
            None => GameEvent::Success {
                xp_awarded: 0,
                new_level: 0,
                leveled_up: false,
                note: Some("XP could not be recorded".into()),
            },
        };
        self.notify(user, event);
        award
    }

    fn deny(&self, user: UserRef, perk: PerkKind, err: GameError) -> GameError {
        debug!("{} denied {}: {}", user, perk, err);
        self.notify(user, GameEvent::PerkDenied { perk, reason: err.to_string() });
        err
    }

    fn notify(&self, user: UserRef, event: GameEvent) {
        self.sink.notify(Notification::new(user, event));
    }
}
