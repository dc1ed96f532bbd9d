//! Runtime Configuration
//!
//! Every tunable of the puzzle flow, the perk rules and the XP economy.
//! Defaults match the live bot; `from_env` overrides a subset from
//! `HACKSHELL_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::words::Difficulty;

/// Upper bound on a puzzle time budget read from the environment.
pub const MAX_PUZZLE_SECS: u64 = 24 * 60 * 60;

/// Puzzle flow configuration.
#[derive(Debug, Clone)]
pub struct PuzzleConfig {
    /// Time budget for an easy puzzle.
    pub easy_duration: Duration,
    /// Time budget for a hard puzzle.
    pub hard_duration: Duration,
    /// Minimum interval between two starts by the same user.
    pub start_cooldown: Duration,
    /// Deadline watcher polling interval.
    pub poll_interval: Duration,
    /// Guesses allowed per puzzle.
    pub max_attempts: u8,
    /// Upper bound on the external hint call.
    pub hint_timeout: Duration,
}

impl Default for PuzzleConfig {
    fn default() -> Self {
        Self {
            easy_duration: Duration::from_secs(90),
            hard_duration: Duration::from_secs(180),
            start_cooldown: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            max_attempts: 3,
            hint_timeout: Duration::from_secs(5),
        }
    }
}

impl PuzzleConfig {
    /// Time budget for a tier.
    pub fn duration_for(&self, difficulty: Difficulty) -> Duration {
        match difficulty {
            Difficulty::Easy => self.easy_duration,
            Difficulty::Hard => self.hard_duration,
        }
    }
}

/// Perk rules.
#[derive(Debug, Clone)]
pub struct PerkConfig {
    /// Perk uses per puzzle below `boosted_level`.
    pub base_limit: u8,
    /// Perk uses per puzzle at or above `boosted_level`.
    pub boosted_limit: u8,
    /// Level granting `boosted_limit`.
    pub boosted_level: u8,
    /// Deadline extension granted by Stall.
    pub stall_extension: Duration,
    /// Per-user cooldown between two Bypass uses.
    pub bypass_cooldown: Duration,
    /// Overclock success chance at level 0.
    pub overclock_base: f64,
    /// Overclock chance added per level.
    pub overclock_per_level: f64,
    /// Overclock chance ceiling.
    pub overclock_cap: f64,
    /// XP removed when Overclock fails.
    pub overclock_penalty: u64,
}

impl Default for PerkConfig {
    fn default() -> Self {
        Self {
            base_limit: 1,
            boosted_limit: 2,
            boosted_level: 4,
            stall_extension: Duration::from_secs(10),
            bypass_cooldown: Duration::from_secs(24 * 60 * 60),
            overclock_base: 0.30,
            overclock_per_level: 0.10,
            overclock_cap: 0.70,
            overclock_penalty: 5,
        }
    }
}

/// How often the login bonus may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBonusWindow {
    /// Once per UTC calendar day.
    CalendarDay,
    /// Once per rolling window of this many hours.
    Hours(u32),
}

/// XP economy configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Level thresholds, strictly increasing, first entry 0.
    pub thresholds: Vec<u64>,
    /// Maximum XP applied through `add_xp` per UTC day.
    pub daily_xp_cap: u64,
    /// Base award for a solved puzzle.
    pub base_hack_xp: u64,
    /// Extra award for an easy puzzle.
    pub easy_bonus: u64,
    /// Extra award for a hard puzzle.
    pub hard_bonus: u64,
    /// Flat bonus on the first rewarded solve of the day.
    pub first_success_bonus: u64,
    /// Consolation award when all attempts are spent.
    pub failure_xp: u64,
    /// Login bonus.
    pub login_bonus: u64,
    /// Login bonus window.
    pub login_window: LoginBonusWindow,
    /// Solves faster than this earn nothing.
    pub min_solve_time: Duration,
    /// Completions per trailing hour paid at the full rate.
    pub full_rate_per_hour: u32,
    /// Completions per trailing hour paid at all (reduced past `full_rate_per_hour`).
    pub paid_per_hour: u32,
    /// Multiplier between the two hourly breakpoints.
    pub reduced_rate: f64,
    /// Speed bonus reference time for easy puzzles.
    pub easy_target_time: Duration,
    /// Speed bonus reference time for hard puzzles.
    pub hard_target_time: Duration,
    /// Largest speed bonus for easy puzzles.
    pub easy_speed_bonus: u64,
    /// Largest speed bonus for hard puzzles.
    pub hard_speed_bonus: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![0, 100, 300, 600, 1000],
            daily_xp_cap: 500,
            base_hack_xp: 50,
            easy_bonus: 0,
            hard_bonus: 50,
            first_success_bonus: 25,
            failure_xp: 5,
            login_bonus: 5,
            login_window: LoginBonusWindow::CalendarDay,
            min_solve_time: Duration::from_secs(6),
            full_rate_per_hour: 5,
            paid_per_hour: 10,
            reduced_rate: 0.2,
            easy_target_time: Duration::from_secs(15),
            hard_target_time: Duration::from_secs(30),
            easy_speed_bonus: 20,
            hard_speed_bonus: 40,
        }
    }
}

impl LedgerConfig {
    /// Base plus tier bonus.
    pub fn base_award(&self, difficulty: Difficulty) -> u64 {
        self.base_hack_xp
            + match difficulty {
                Difficulty::Easy => self.easy_bonus,
                Difficulty::Hard => self.hard_bonus,
            }
    }

    /// Speed bonus reference time and maximum for a tier.
    pub fn speed_bonus_for(&self, difficulty: Difficulty) -> (Duration, u64) {
        match difficulty {
            Difficulty::Easy => (self.easy_target_time, self.easy_speed_bonus),
            Difficulty::Hard => (self.hard_target_time, self.hard_speed_bonus),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Puzzle flow.
    pub puzzle: PuzzleConfig,
    /// Perk rules.
    pub perks: PerkConfig,
    /// XP economy.
    pub ledger: LedgerConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("levels.sqlite3"),
            puzzle: PuzzleConfig::default(),
            perks: PerkConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl GameConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HACKSHELL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(secs) = env_parse::<u64>("HACKSHELL_EASY_SECS") {
            config.puzzle.easy_duration = Duration::from_secs(secs.clamp(1, MAX_PUZZLE_SECS));
        }
        if let Some(secs) = env_parse::<u64>("HACKSHELL_HARD_SECS") {
            config.puzzle.hard_duration = Duration::from_secs(secs.clamp(1, MAX_PUZZLE_SECS));
        }
        if let Some(secs) = env_parse::<u64>("HACKSHELL_START_COOLDOWN_SECS") {
            config.puzzle.start_cooldown = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("HACKSHELL_POLL_MS") {
            config.puzzle.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = env_parse::<u64>("HACKSHELL_HINT_TIMEOUT_MS") {
            config.puzzle.hint_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("HACKSHELL_BYPASS_COOLDOWN_SECS") {
            config.perks.bypass_cooldown = Duration::from_secs(secs);
        }
        if let Some(cap) = env_parse::<u64>("HACKSHELL_DAILY_XP_CAP") {
            config.ledger.daily_xp_cap = cap;
        }
        if let Some(hours) = env_parse::<u32>("HACKSHELL_LOGIN_BONUS_HOURS") {
            config.ledger.login_window = LoginBonusWindow::Hours(hours.max(1));
        }

        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_durations() {
        let config = PuzzleConfig::default();
        assert_eq!(config.duration_for(Difficulty::Easy), Duration::from_secs(90));
        assert_eq!(config.duration_for(Difficulty::Hard), Duration::from_secs(180));
        assert_eq!(config.start_cooldown, Duration::from_secs(5));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_base_award_by_tier() {
        let config = LedgerConfig::default();
        assert_eq!(config.base_award(Difficulty::Easy), 50);
        assert_eq!(config.base_award(Difficulty::Hard), 100);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("HACKSHELL_DAILY_XP_CAP", "750");
        std::env::set_var("HACKSHELL_POLL_MS", "0");
        std::env::set_var("HACKSHELL_EASY_SECS", u64::MAX.to_string());
        std::env::set_var("HACKSHELL_HARD_SECS", "0");
        let config = GameConfig::from_env();
        for key in ["HACKSHELL_DAILY_XP_CAP", "HACKSHELL_POLL_MS", "HACKSHELL_EASY_SECS", "HACKSHELL_HARD_SECS"] {
            std::env::remove_var(key);
        }

        assert_eq!(config.ledger.daily_xp_cap, 750);
        assert_eq!(config.puzzle.poll_interval, Duration::from_millis(1));
        assert_eq!(config.puzzle.easy_duration, Duration::from_secs(MAX_PUZZLE_SECS));
        assert_eq!(config.puzzle.hard_duration, Duration::from_secs(1));
    }
}
