//! XP Ledger
//!
//! Award rules on top of [`LevelStore`]. Every read-modify-write of an
//! account runs under one store-wide async lock, so concurrent awards for the
//! same user never lose an update.
//!
//! Each public operation has an `_at` twin taking the current time, used by
//! the tests to pin days and hours.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::{LedgerConfig, LoginBonusWindow};
use crate::core::words::Difficulty;
use crate::error::StoreError;
use crate::game::puzzle::UserRef;
use crate::ledger::levels::{LevelTable, LevelTableError};
use crate::ledger::store::{Account, HackLogEntry, LevelStore, XpLogEntry};

/// XP log reasons.
pub mod reason {
    /// Solved puzzle.
    pub const HACK_SUCCESS: &str = "hack_success";
    /// Attempts exhausted.
    pub const HACK_FAILURE: &str = "hack_failure";
    /// Login bonus.
    pub const LOGIN_BONUS: &str = "daily_login";
    /// Signed adjustment outside the daily cap.
    pub const ADJUSTMENT: &str = "adjustment";
    /// Administrative override.
    pub const ADMIN: &str = "admin";
}

/// Result of a capped XP credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Award {
    /// Account after the credit.
    pub account: Account,
    /// XP actually applied after the daily cap.
    pub applied: u64,
    /// Whether the level went up.
    pub leveled_up: bool,
}

/// Result of a solved puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HackAward {
    /// Credit applied.
    pub award: Award,
    /// Human-readable explanation of reductions and bonuses.
    pub note: Option<String>,
}

/// Position on the level ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rank {
    /// Account.
    pub account: Account,
    /// XP missing for the next level, `None` at the top.
    pub xp_to_next: Option<u64>,
}

/// XP and level bookkeeping.
pub struct XpLedger {
    store: LevelStore,
    config: LedgerConfig,
    levels: LevelTable,
    award_lock: Mutex<()>,
}

impl XpLedger {
    /// Create a ledger. Fails if the configured thresholds are invalid.
    pub fn new(store: LevelStore, config: LedgerConfig) -> Result<Self, LevelTableError> {
        let levels = LevelTable::new(config.thresholds.clone())?;
        Ok(Self {
            store,
            config,
            levels,
            award_lock: Mutex::new(()),
        })
    }

    /// Underlying store.
    pub fn store(&self) -> &LevelStore {
        &self.store
    }

    // =========================================================================
    // CREDITS
    // =========================================================================

    /// Credit XP, honouring the daily cap.
    pub async fn add_xp(&self, user: UserRef, amount: u64, reason: &str) -> Result<Award, StoreError> {
        self.add_xp_at(user, amount, reason, Utc::now()).await
    }

    /// [`add_xp`](Self::add_xp) at a given time.
    pub async fn add_xp_at(
        &self,
        user: UserRef,
        amount: u64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Award, StoreError> {
        let _guard = self.award_lock.lock().await;
        let mut account = self.store.get_or_create(user).await?;
        let (applied, leveled_up) = self.credit(&mut account, amount, now);
        let entry = log_entry(applied, reason, None, now);
        self.store.commit(&account, entry, None).await?;
        Ok(Award { account, applied, leveled_up })
    }

    /// Score a solved puzzle.
    pub async fn record_hack_success(
        &self,
        user: UserRef,
        difficulty: Difficulty,
        duration: Duration,
    ) -> Result<HackAward, StoreError> {
        self.record_hack_success_at(user, difficulty, duration, Utc::now()).await
    }

    /// [`record_hack_success`](Self::record_hack_success) at a given time.
    #[instrument(skip(self))]
    pub async fn record_hack_success_at(
        &self,
        user: UserRef,
        difficulty: Difficulty,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<HackAward, StoreError> {
        let _guard = self.award_lock.lock().await;
        let hack = HackLogEntry { difficulty, duration, created_at: now };

        if duration < self.config.min_solve_time {
            self.store.append_hack_log(user, hack).await?;
            let account = self.store.get_or_create(user).await?;
            debug!("Ignored {:?} solve by {}", duration, user);
            return Ok(HackAward {
                award: Award { account, applied: 0, leveled_up: false },
                note: Some("Ignored: too fast".to_string()),
            });
        }

        let prior = self
            .store
            .count_hacks_since(user, now - chrono::Duration::hours(1))
            .await?;
        let multiplier = self.hourly_multiplier(prior);

        let gross = self.config.base_award(difficulty) + self.speed_bonus(difficulty, duration);
        let mut amount = (gross as f64 * multiplier).floor() as u64;

        let mut notes = Vec::new();
        if multiplier == 0.0 {
            notes.push("No XP (hourly limit reached)".to_string());
        } else if multiplier < 1.0 {
            notes.push("Reduced XP (diminishing returns)".to_string());
        }

        if amount > 0 {
            let today = self
                .store
                .count_xp_log_since(user, reason::HACK_SUCCESS, start_of_day(now))
                .await?;
            if today == 0 {
                amount += self.config.first_success_bonus;
                notes.push(format!("+{} daily bonus", self.config.first_success_bonus));
            }
        }

        let mut account = self.store.get_or_create(user).await?;
        let (applied, leveled_up) = self.credit(&mut account, amount, now);
        if applied < amount {
            notes.push("Daily XP cap reached".to_string());
        }
        account.hacks_completed += 1;
        account.last_hack_at = Some(now);

        let entry = log_entry(applied, reason::HACK_SUCCESS, None, now);
        self.store.commit(&account, entry, Some(hack)).await?;

        info!(applied, level = account.level, "Hack solved by {}", user);
        Ok(HackAward {
            award: Award { account, applied, leveled_up },
            note: (!notes.is_empty()).then(|| notes.join("; ")),
        })
    }

    /// Consolation XP when all attempts are spent.
    pub async fn record_hack_failure(&self, user: UserRef) -> Result<Award, StoreError> {
        self.record_hack_failure_at(user, Utc::now()).await
    }

    /// [`record_hack_failure`](Self::record_hack_failure) at a given time.
    pub async fn record_hack_failure_at(&self, user: UserRef, now: DateTime<Utc>) -> Result<Award, StoreError> {
        self.add_xp_at(user, self.config.failure_xp, reason::HACK_FAILURE, now).await
    }

    /// Stamp a login and grant the login bonus once per window.
    pub async fn record_online(&self, user: UserRef) -> Result<Award, StoreError> {
        self.record_online_at(user, Utc::now()).await
    }

    /// [`record_online`](Self::record_online) at a given time.
    pub async fn record_online_at(&self, user: UserRef, now: DateTime<Utc>) -> Result<Award, StoreError> {
        let _guard = self.award_lock.lock().await;
        let mut account = self.store.get_or_create(user).await?;

        let due = match (self.config.login_window, account.last_daily_bonus_at) {
            (_, None) => true,
            (LoginBonusWindow::CalendarDay, Some(last)) => last.date_naive() != now.date_naive(),
            (LoginBonusWindow::Hours(hours), Some(last)) => {
                now - last >= chrono::Duration::hours(i64::from(hours))
            }
        };

        account.last_online_at = Some(now);
        let (applied, leveled_up) = if due {
            account.last_daily_bonus_at = Some(now);
            self.credit(&mut account, self.config.login_bonus, now)
        } else {
            (0, false)
        };

        let entry = log_entry(applied, reason::LOGIN_BONUS, None, now);
        self.store.commit(&account, entry, None).await?;
        Ok(Award { account, applied, leveled_up })
    }

    // =========================================================================
    // ADJUSTMENTS
    // =========================================================================

    /// Apply a signed change outside the daily cap. XP never drops below 0.
    pub async fn add_xp_delta(&self, user: UserRef, delta: i64, note: &str) -> Result<Account, StoreError> {
        self.add_xp_delta_at(user, delta, note, Utc::now()).await
    }

    /// [`add_xp_delta`](Self::add_xp_delta) at a given time.
    pub async fn add_xp_delta_at(
        &self,
        user: UserRef,
        delta: i64,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let _guard = self.award_lock.lock().await;
        let mut account = self.store.get_or_create(user).await?;
        let before = account.xp;
        let after = if delta >= 0 {
            before.saturating_add(delta.unsigned_abs())
        } else {
            before.saturating_sub(delta.unsigned_abs())
        };
        self.overwrite_xp(&mut account, after);

        let applied = signed_diff(before, after);
        let entry = (applied != 0).then(|| XpLogEntry::new(applied, reason::ADJUSTMENT, Some(note.to_string()), now));
        self.store.commit(&account, entry, None).await?;
        Ok(account)
    }

    /// Set total XP. Level follows.
    pub async fn set_xp(&self, user: UserRef, xp: u64) -> Result<Account, StoreError> {
        let _guard = self.award_lock.lock().await;
        let mut account = self.store.get_or_create(user).await?;
        let before = account.xp;
        self.overwrite_xp(&mut account, xp);

        let applied = signed_diff(before, xp);
        let entry = (applied != 0).then(|| XpLogEntry::new(applied, reason::ADMIN, Some("set_xp".into()), Utc::now()));
        self.store.commit(&account, entry, None).await?;
        info!("XP of {} set to {}", user, xp);
        Ok(account)
    }

    /// Set the level, moving XP to that level's threshold.
    pub async fn set_level(&self, user: UserRef, level: u8) -> Result<Account, StoreError> {
        let xp = self.levels.threshold(level);
        self.set_xp(user, xp).await
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current level, 0 for unknown users.
    pub async fn level_of(&self, user: UserRef) -> Result<u8, StoreError> {
        Ok(self.store.level(user).await?.unwrap_or(0))
    }

    /// Account and distance to the next level.
    pub async fn rank(&self, user: UserRef) -> Result<Rank, StoreError> {
        let account = self.store.get_or_create(user).await?;
        let xp_to_next = self.levels.xp_to_next(account.xp);
        Ok(Rank { account, xp_to_next })
    }

    /// Top `n` accounts in a scope.
    pub async fn leaderboard(&self, scope: u64, n: usize) -> Result<Vec<Account>, StoreError> {
        self.store.top_n(scope, n).await
    }

    /// Last Bypass use.
    pub async fn last_bypass_at(&self, user: UserRef) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.last_bypass_at(user).await
    }

    /// Record a Bypass use.
    pub async fn mark_bypass_used(&self, user: UserRef, now: DateTime<Utc>) -> Result<(), StoreError> {
        let _guard = self.award_lock.lock().await;
        let mut account = self.store.get_or_create(user).await?;
        account.last_bypass_at = Some(now);
        self.store.update(&account).await
    }

    // =========================================================================
    // RULES
    // =========================================================================

    /// Credit up to the remaining daily allowance. Returns (applied, leveled_up).
    fn credit(&self, account: &mut Account, amount: u64, now: DateTime<Utc>) -> (u64, bool) {
        let today = now.date_naive();
        if account.daily_reset_on != Some(today) {
            account.daily_reset_on = Some(today);
            account.daily_xp_earned = 0;
        }

        let room = self.config.daily_xp_cap.saturating_sub(account.daily_xp_earned);
        let applied = amount.min(room);
        account.daily_xp_earned += applied;

        let before = account.level;
        self.overwrite_xp(account, account.xp.saturating_add(applied));
        (applied, account.level > before)
    }

    fn overwrite_xp(&self, account: &mut Account, xp: u64) {
        account.xp = xp;
        account.level = self.levels.level_for_xp(xp);
    }

    fn hourly_multiplier(&self, prior: u32) -> f64 {
        if prior < self.config.full_rate_per_hour {
            1.0
        } else if prior < self.config.paid_per_hour {
            self.config.reduced_rate
        } else {
            0.0
        }
    }

    /// `max * clamp((2T - d) / T, 0, 1)`, floored.
    fn speed_bonus(&self, difficulty: Difficulty, duration: Duration) -> u64 {
        let (target, max) = self.config.speed_bonus_for(difficulty);
        if target.is_zero() {
            return 0;
        }
        let t = target.as_secs_f64();
        let factor = ((2.0 * t - duration.as_secs_f64()) / t).clamp(0.0, 1.0);
        (max as f64 * factor).floor() as u64
    }
}

fn log_entry(applied: u64, reason: &str, note: Option<String>, now: DateTime<Utc>) -> Option<XpLogEntry> {
    (applied > 0).then(|| XpLogEntry::new(i64::try_from(applied).unwrap_or(i64::MAX), reason, note, now))
}

fn signed_diff(before: u64, after: u64) -> i64 {
    if after >= before {
        i64::try_from(after - before).unwrap_or(i64::MAX)
    } else {
        -i64::try_from(before - after).unwrap_or(i64::MAX)
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now, |midnight| Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOW_EASY: Duration = Duration::from_secs(40);

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        base_time() + chrono::Duration::minutes(m)
    }

    async fn ledger_with(config: LedgerConfig) -> XpLedger {
        let store = LevelStore::open_in_memory().await.unwrap();
        XpLedger::new(store, config).unwrap()
    }

    async fn ledger() -> XpLedger {
        ledger_with(LedgerConfig::default()).await
    }

    fn user() -> UserRef {
        UserRef::new(100, 1)
    }

    #[tokio::test]
    async fn test_daily_cap_is_exact() {
        let ledger = ledger().await;

        let a = ledger.add_xp_at(user(), 480, "test", minutes(0)).await.unwrap();
        assert_eq!(a.applied, 480);
        assert_eq!(a.account.level, 2);

        let a = ledger.add_xp_at(user(), 50, "test", minutes(1)).await.unwrap();
        assert_eq!(a.applied, 20);
        assert_eq!(a.account.daily_xp_earned, 500);

        let a = ledger.add_xp_at(user(), 5, "test", minutes(2)).await.unwrap();
        assert_eq!(a.applied, 0);
        assert_eq!(a.account.xp, 500);

        // Next UTC day starts a fresh allowance.
        let a = ledger.add_xp_at(user(), 50, "test", minutes(24 * 60)).await.unwrap();
        assert_eq!(a.applied, 50);
        assert_eq!(a.account.daily_xp_earned, 50);
        assert_eq!(a.account.xp, 550);
    }

    #[tokio::test]
    async fn test_level_up_reported() {
        let ledger = ledger().await;
        let a = ledger.add_xp_at(user(), 99, "test", minutes(0)).await.unwrap();
        assert!(!a.leveled_up);
        let a = ledger.add_xp_at(user(), 1, "test", minutes(1)).await.unwrap();
        assert!(a.leveled_up);
        assert_eq!(a.account.level, 1);
    }

    #[tokio::test]
    async fn test_first_success_gets_daily_bonus() {
        let ledger = ledger().await;

        let first = ledger
            .record_hack_success_at(user(), Difficulty::Hard, Duration::from_secs(60), minutes(0))
            .await
            .unwrap();
        assert_eq!(first.award.applied, 125);
        assert_eq!(first.note.as_deref(), Some("+25 daily bonus"));
        assert_eq!(first.award.account.hacks_completed, 1);

        let second = ledger
            .record_hack_success_at(user(), Difficulty::Hard, Duration::from_secs(60), minutes(1))
            .await
            .unwrap();
        assert_eq!(second.award.applied, 100);
        assert_eq!(second.note, None);
    }

    #[tokio::test]
    async fn test_speed_bonus_scales_with_time() {
        let ledger = ledger().await;
        let fast = ledger
            .record_hack_success_at(user(), Difficulty::Easy, Duration::from_secs(10), minutes(0))
            .await
            .unwrap();
        // 50 base + full 20 speed + 25 first of day.
        assert_eq!(fast.award.applied, 95);

        let mid = ledger
            .record_hack_success_at(user(), Difficulty::Easy, Duration::from_secs(24), minutes(1))
            .await
            .unwrap();
        // (30 - 24) / 15 = 0.4 of 20.
        assert_eq!(mid.award.applied, 58);
    }

    #[tokio::test]
    async fn test_hourly_diminishing_returns() {
        let ledger = ledger_with(LedgerConfig { daily_xp_cap: 100_000, ..LedgerConfig::default() }).await;

        let mut applied = Vec::new();
        for i in 0..11 {
            let award = ledger
                .record_hack_success_at(user(), Difficulty::Easy, SLOW_EASY, minutes(i))
                .await
                .unwrap();
            applied.push(award.award.applied);
        }

        assert_eq!(applied[0], 75);
        assert!(applied[1..5].iter().all(|&xp| xp == 50));
        assert!(applied[5..10].iter().all(|&xp| xp == 10));
        assert!(applied[5] < applied[1]);
        assert_eq!(applied[10], 0);

        // An hour later the window has emptied again.
        let later = ledger
            .record_hack_success_at(user(), Difficulty::Easy, SLOW_EASY, minutes(75))
            .await
            .unwrap();
        assert_eq!(later.award.applied, 50);
        assert_eq!(later.award.account.hacks_completed, 12);
    }

    #[tokio::test]
    async fn test_too_fast_is_logged_but_unpaid() {
        let ledger = ledger().await;
        let award = ledger
            .record_hack_success_at(user(), Difficulty::Easy, Duration::from_secs(3), minutes(0))
            .await
            .unwrap();
        assert_eq!(award.award.applied, 0);
        assert_eq!(award.note.as_deref(), Some("Ignored: too fast"));
        assert_eq!(award.award.account.hacks_completed, 0);
        assert_eq!(ledger.store().count_hacks_since(user(), minutes(-1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_login_bonus_once_per_day() {
        let ledger = ledger().await;
        assert_eq!(ledger.record_online_at(user(), minutes(0)).await.unwrap().applied, 5);

        let again = ledger.record_online_at(user(), minutes(30)).await.unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(again.account.last_online_at, Some(minutes(30)));

        assert_eq!(ledger.record_online_at(user(), minutes(13 * 60)).await.unwrap().applied, 5);
    }

    #[tokio::test]
    async fn test_login_bonus_rolling_window() {
        let ledger = ledger_with(LedgerConfig {
            login_window: LoginBonusWindow::Hours(12),
            ..LedgerConfig::default()
        })
        .await;
        assert_eq!(ledger.record_online_at(user(), minutes(0)).await.unwrap().applied, 5);
        assert_eq!(ledger.record_online_at(user(), minutes(11 * 60)).await.unwrap().applied, 0);
        assert_eq!(ledger.record_online_at(user(), minutes(12 * 60)).await.unwrap().applied, 5);
    }

    #[tokio::test]
    async fn test_delta_floors_at_zero_and_ignores_cap() {
        let ledger = ledger().await;
        ledger.add_xp_at(user(), 500, "test", minutes(0)).await.unwrap();

        let account = ledger.add_xp_delta_at(user(), 700, "grant", minutes(1)).await.unwrap();
        assert_eq!(account.xp, 1200);
        assert_eq!(account.level, 4);

        let account = ledger.add_xp_delta_at(user(), -5000, "penalty", minutes(2)).await.unwrap();
        assert_eq!(account.xp, 0);
        assert_eq!(account.level, 0);

        let log = ledger.store().recent_xp_log(user(), 1).await.unwrap();
        assert_eq!(log[0].amount, -1200);
        assert_eq!(log[0].note.as_deref(), Some("penalty"));
    }

    #[tokio::test]
    async fn test_admin_overrides_and_rank() {
        let ledger = ledger().await;

        let account = ledger.set_level(user(), 3).await.unwrap();
        assert_eq!((account.level, account.xp), (3, 600));

        let rank = ledger.rank(user()).await.unwrap();
        assert_eq!(rank.xp_to_next, Some(400));

        ledger.set_xp(user(), 5000).await.unwrap();
        assert_eq!(ledger.rank(user()).await.unwrap().xp_to_next, None);
        assert_eq!(ledger.level_of(user()).await.unwrap(), 4);
        assert_eq!(ledger.level_of(UserRef::new(999, 1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_leaderboard_and_bypass_stamp() {
        let ledger = ledger().await;
        ledger.set_xp(UserRef::new(1, 9), 150).await.unwrap();
        ledger.set_xp(UserRef::new(2, 9), 700).await.unwrap();

        let board = ledger.leaderboard(9, 10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user, UserRef::new(2, 9));

        assert_eq!(ledger.last_bypass_at(user()).await.unwrap(), None);
        ledger.mark_bypass_used(user(), minutes(0)).await.unwrap();
        assert_eq!(ledger.last_bypass_at(user()).await.unwrap(), Some(minutes(0)));
    }
}
