//! Level-Gated Perks
//!
//! Each puzzle carries a small pool of perk uses (`perk_limit`). A perk is
//! refused once the pool is spent, or when the user's level is too low.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::PerkConfig;
use crate::error::{GameError, GameResult};
use crate::game::puzzle::Puzzle;

/// Positions disclosed by one Reveal.
pub const REVEAL_COUNT: usize = 2;

/// Perk kinds. Discriminant is the required level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PerkKind {
    /// Disclose answer letters.
    Reveal = 1,
    /// Extend the deadline.
    Stall = 2,
    /// Solve outright, once per cooldown window.
    Bypass = 3,
    /// Gamble on an instant solve.
    Overclock = 4,
}

impl PerkKind {
    /// All perks in level order.
    pub const ALL: [PerkKind; 4] = [PerkKind::Reveal, PerkKind::Stall, PerkKind::Bypass, PerkKind::Overclock];

    /// Minimum level to use this perk.
    pub fn required_level(self) -> u8 {
        self as u8
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            PerkKind::Reveal => "reveal",
            PerkKind::Stall => "stall",
            PerkKind::Bypass => "bypass",
            PerkKind::Overclock => "overclock",
        }
    }
}

impl fmt::Display for PerkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerkKind {
    type Err = String;

    /// Accepts the perk name or its command slot (`p1`..`p4`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reveal" | "p1" => Ok(PerkKind::Reveal),
            "stall" | "pause" | "p2" => Ok(PerkKind::Stall),
            "bypass" | "skip" | "p3" => Ok(PerkKind::Bypass),
            "overclock" | "autosolve" | "p4" => Ok(PerkKind::Overclock),
            other => Err(format!("unknown perk: {}", other)),
        }
    }
}

/// Perk rules.
#[derive(Debug, Clone)]
pub struct PerkEngine {
    config: PerkConfig,
}

impl PerkEngine {
    /// Create an engine.
    pub fn new(config: PerkConfig) -> Self {
        Self { config }
    }

    /// Rules in effect.
    pub fn config(&self) -> &PerkConfig {
        &self.config
    }

    /// Perk uses granted to a puzzle started at `level`.
    pub fn perk_limit_for(&self, level: u8) -> u8 {
        if level >= self.config.boosted_level {
            self.config.boosted_limit
        } else {
            self.config.base_limit
        }
    }

    /// Gate a perk: pool first, then level.
    pub fn check(&self, kind: PerkKind, level: u8, puzzle: &Puzzle) -> GameResult<()> {
        if puzzle.perks_remaining() == 0 {
            return Err(GameError::PerkExhausted);
        }
        if level < kind.required_level() {
            return Err(GameError::LevelLocked { required: kind.required_level() });
        }
        Ok(())
    }

    /// Spend one perk use.
    pub fn consume(&self, puzzle: &mut Puzzle) {
        puzzle.perks_used = puzzle.perks_used.saturating_add(1);
    }

    /// Disclose up to [`REVEAL_COUNT`] hidden positions and spend a use.
    ///
    /// Returns the newly disclosed positions, or `None` without spending
    /// anything when every position is already visible.
    pub fn reveal<R: Rng + ?Sized>(&self, puzzle: &mut Puzzle, rng: &mut R) -> Option<Vec<usize>> {
        let hidden = puzzle.hidden_positions();
        if hidden.is_empty() {
            return None;
        }

        let mut picked: Vec<usize> = hidden
            .choose_multiple(rng, REVEAL_COUNT.min(hidden.len()))
            .copied()
            .collect();
        picked.sort_unstable();

        puzzle.revealed.extend(picked.iter().copied());
        self.consume(puzzle);
        Some(picked)
    }

    /// Push the deadline back and spend a use. Returns the new deadline.
    pub fn stall(&self, puzzle: &mut Puzzle) -> Instant {
        let deadline = puzzle.extend(self.config.stall_extension);
        self.consume(puzzle);
        deadline
    }

    /// Time left on the Bypass cooldown, `None` when ready.
    pub fn bypass_remaining(&self, last_used: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
        let last_used = last_used?;
        let elapsed = (now - last_used).to_std().unwrap_or_default();
        self.config
            .bypass_cooldown
            .checked_sub(elapsed)
            .filter(|left| !left.is_zero())
    }

    /// Overclock success probability at `level`.
    pub fn overclock_chance(&self, level: u8) -> f64 {
        let chance = self.config.overclock_base + self.config.overclock_per_level * f64::from(level);
        chance.min(self.config.overclock_cap).clamp(0.0, 1.0)
    }

    /// Roll an Overclock.
    pub fn roll_overclock<R: Rng + ?Sized>(&self, level: u8, rng: &mut R) -> bool {
        rng.gen::<f64>() < self.overclock_chance(level)
    }
}

impl Default for PerkEngine {
    fn default() -> Self {
        Self::new(PerkConfig::default())
    }
}
