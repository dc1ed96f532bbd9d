//! SQLite Level Store
//!
//! One account row per `(user, scope)` plus two append-only logs. All access
//! goes through a single connection behind an async mutex; queries run on the
//! blocking pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::words::Difficulty;
use crate::error::StoreError;
use crate::game::puzzle::UserRef;

/// Attempts for a statement hitting a busy or locked database.
const MAX_ATTEMPTS: u32 = 3;

/// Backoff step between attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

const ACCOUNT_COLUMNS: &str = "user_id, guild_id, xp, level, hacks_completed, last_online_at, \
     last_hack_at, last_daily_bonus_at, daily_xp_earned, daily_reset_on, last_bypass_at";

// =============================================================================
// RECORDS
// =============================================================================

/// Persistent progress of one user in one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Owner.
    pub user: UserRef,
    /// Total XP.
    pub xp: u64,
    /// Level derived from `xp`.
    pub level: u8,
    /// Solved puzzles.
    pub hacks_completed: u64,
    /// Last login.
    pub last_online_at: Option<DateTime<Utc>>,
    /// Last solved puzzle.
    pub last_hack_at: Option<DateTime<Utc>>,
    /// Last login bonus.
    pub last_daily_bonus_at: Option<DateTime<Utc>>,
    /// XP applied on `daily_reset_on`.
    pub daily_xp_earned: u64,
    /// UTC day `daily_xp_earned` belongs to.
    pub daily_reset_on: Option<NaiveDate>,
    /// Last Bypass use.
    pub last_bypass_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Fresh account with no progress.
    pub fn new(user: UserRef) -> Self {
        Self {
            user,
            xp: 0,
            level: 0,
            hacks_completed: 0,
            last_online_at: None,
            last_hack_at: None,
            last_daily_bonus_at: None,
            daily_xp_earned: 0,
            daily_reset_on: None,
            last_bypass_at: None,
        }
    }
}

/// One XP change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpLogEntry {
    /// Signed change actually applied.
    pub amount: i64,
    /// Machine-readable reason (`hack_success`, `login_bonus`, ...).
    pub reason: String,
    /// Free-form note.
    pub note: Option<String>,
    /// When it was applied.
    pub created_at: DateTime<Utc>,
}

impl XpLogEntry {
    /// Create an entry.
    pub fn new(amount: i64, reason: impl Into<String>, note: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self { amount, reason: reason.into(), note, created_at }
    }
}

/// One completed puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HackLogEntry {
    /// Tier.
    pub difficulty: Difficulty,
    /// Time taken.
    pub duration: Duration,
    /// When it was completed.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// STORE
// =============================================================================

/// SQLite-backed account and log store.
#[derive(Clone)]
pub struct LevelStore {
    conn: Arc<Mutex<Connection>>,
}

impl LevelStore {
    /// Open or create a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!("Opening level database at: {}", path.display());

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(Duration::from_millis(250))?;
            Ok(conn)
        })
        .await??;

        Self::with_connection(conn).await
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.call(init_schema).await?;
        Ok(store)
    }

    /// Run `f` on the blocking pool, retrying busy and locked errors.
    async fn call<R, F>(&self, mut f: F) -> Result<R, StoreError>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        let result = tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let mut attempt = 1;
            loop {
                match f(&mut conn) {
                    Err(e) if is_contention(&e) && attempt < MAX_ATTEMPTS => {
                        warn!("Database busy (attempt {}/{}): {}", attempt, MAX_ATTEMPTS, e);
                        std::thread::sleep(RETRY_BACKOFF * attempt);
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        })
        .await?;

        Ok(result?)
    }

    /// Fetch an account, if it exists.
    pub async fn get(&self, user: UserRef) -> Result<Option<Account>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE user_id = ?1 AND guild_id = ?2", ACCOUNT_COLUMNS),
                params![key(user.user.0), key(user.scope.0)],
                account_from_row,
            )
            .optional()
        })
        .await
    }

    /// Level of an account, if it exists.
    pub async fn level(&self, user: UserRef) -> Result<Option<u8>, StoreError> {
        let level: Option<i64> = self
            .call(move |conn| {
                conn.query_row(
                    "SELECT level FROM users WHERE user_id = ?1 AND guild_id = ?2",
                    params![key(user.user.0), key(user.scope.0)],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(level.map(|l| u8::try_from(l).unwrap_or(u8::MAX)))
    }

    /// Last Bypass use of an account.
    pub async fn last_bypass_at(&self, user: UserRef) -> Result<Option<DateTime<Utc>>, StoreError> {
        let stamp: Option<Option<DateTime<Utc>>> = self
            .call(move |conn| {
                conn.query_row(
                    "SELECT last_bypass_at FROM users WHERE user_id = ?1 AND guild_id = ?2",
                    params![key(user.user.0), key(user.scope.0)],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(stamp.flatten())
    }

    /// Fetch an account, creating an empty one on first sight.
    pub async fn get_or_create(&self, user: UserRef) -> Result<Account, StoreError> {
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (user_id, guild_id) VALUES (?1, ?2)",
                params![key(user.user.0), key(user.scope.0)],
            )?;
            if inserted > 0 {
                debug!("Created account for {}", user);
            }
            conn.query_row(
                &format!("SELECT {} FROM users WHERE user_id = ?1 AND guild_id = ?2", ACCOUNT_COLUMNS),
                params![key(user.user.0), key(user.scope.0)],
                account_from_row,
            )
        })
        .await
    }

    /// Overwrite an account row.
    pub async fn update(&self, account: &Account) -> Result<(), StoreError> {
        let account = account.clone();
        self.call(move |conn| write_account(conn, &account)).await
    }

    /// Write an account together with its log rows in one transaction.
    pub async fn commit(
        &self,
        account: &Account,
        xp: Option<XpLogEntry>,
        hack: Option<HackLogEntry>,
    ) -> Result<(), StoreError> {
        let account = account.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            write_account(&tx, &account)?;
            if let Some(entry) = &xp {
                insert_xp_log(&tx, account.user, entry)?;
            }
            if let Some(entry) = &hack {
                insert_hack_log(&tx, account.user, entry)?;
            }
            tx.commit()
        })
        .await
    }

    /// Append a hack log row.
    pub async fn append_hack_log(&self, user: UserRef, entry: HackLogEntry) -> Result<(), StoreError> {
        self.call(move |conn| insert_hack_log(conn, user, &entry)).await
    }

    /// Best accounts in a scope by level, then XP.
    pub async fn top_n(&self, scope: u64, n: usize) -> Result<Vec<Account>, StoreError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM users WHERE guild_id = ?1
                 ORDER BY level DESC, xp DESC, user_id ASC LIMIT ?2",
                ACCOUNT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![key(scope), limit], account_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Completed puzzles logged at or after `since`.
    pub async fn count_hacks_since(&self, user: UserRef, since: DateTime<Utc>) -> Result<u32, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM hack_log
                 WHERE user_id = ?1 AND guild_id = ?2 AND created_at_ms >= ?3",
                params![key(user.user.0), key(user.scope.0), since.timestamp_millis()],
                |row| row.get(0),
            )
        })
        .await
    }

    /// XP log rows with `reason` at or after `since`.
    pub async fn count_xp_log_since(
        &self,
        user: UserRef,
        reason: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let reason = reason.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM xp_log
                 WHERE user_id = ?1 AND guild_id = ?2 AND reason = ?3 AND created_at_ms >= ?4",
                params![key(user.user.0), key(user.scope.0), reason, since.timestamp_millis()],
                |row| row.get(0),
            )
        })
        .await
    }

    /// Most recent XP log rows, newest first.
    pub async fn recent_xp_log(&self, user: UserRef, limit: usize) -> Result<Vec<XpLogEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT amount, reason, note, created_at_ms FROM xp_log
                 WHERE user_id = ?1 AND guild_id = ?2
                 ORDER BY id DESC LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![key(user.user.0), key(user.scope.0), limit], |row| {
                Ok(XpLogEntry {
                    amount: row.get(0)?,
                    reason: row.get(1)?,
                    note: row.get(2)?,
                    created_at: from_millis(row.get(3)?),
                })
            })?;
            rows.collect()
        })
        .await
    }
    /// Run raw SQL against the database.
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let sql = sql.to_string();
        self.call(move |conn| conn.execute_batch(&sql)).await
    }
}

// =============================================================================
// SQL HELPERS
// =============================================================================

fn init_schema(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER NOT NULL,
            guild_id INTEGER NOT NULL,
            level INTEGER NOT NULL DEFAULT 0,
            xp INTEGER NOT NULL DEFAULT 0,
            hacks_completed INTEGER NOT NULL DEFAULT 0,
            last_online_at TEXT,
            last_hack_at TEXT,
            last_daily_bonus_at TEXT,
            daily_xp_earned INTEGER NOT NULL DEFAULT 0,
            daily_reset_on TEXT,
            last_bypass_at TEXT,
            PRIMARY KEY (user_id, guild_id)
        );

        CREATE TABLE IF NOT EXISTS xp_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            guild_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            reason TEXT NOT NULL,
            note TEXT,
            created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hack_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            guild_id INTEGER NOT NULL,
            difficulty TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_rank ON users(guild_id, level DESC, xp DESC);
        CREATE INDEX IF NOT EXISTS idx_xp_log_user ON xp_log(user_id, guild_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_hack_log_user ON hack_log(user_id, guild_id, created_at_ms);",
    )
}

fn write_account(conn: &Connection, a: &Account) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, guild_id, xp, level, hacks_completed, last_online_at,
                            last_hack_at, last_daily_bonus_at, daily_xp_earned, daily_reset_on,
                            last_bypass_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(user_id, guild_id) DO UPDATE SET
            xp = excluded.xp,
            level = excluded.level,
            hacks_completed = excluded.hacks_completed,
            last_online_at = excluded.last_online_at,
            last_hack_at = excluded.last_hack_at,
            last_daily_bonus_at = excluded.last_daily_bonus_at,
            daily_xp_earned = excluded.daily_xp_earned,
            daily_reset_on = excluded.daily_reset_on,
            last_bypass_at = excluded.last_bypass_at",
        params![
            key(a.user.user.0),
            key(a.user.scope.0),
            to_i64(a.xp),
            i64::from(a.level),
            to_i64(a.hacks_completed),
            a.last_online_at,
            a.last_hack_at,
            a.last_daily_bonus_at,
            to_i64(a.daily_xp_earned),
            a.daily_reset_on,
            a.last_bypass_at,
        ],
    )?;
    Ok(())
}

fn insert_xp_log(conn: &Connection, user: UserRef, entry: &XpLogEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO xp_log (user_id, guild_id, amount, reason, note, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key(user.user.0),
            key(user.scope.0),
            entry.amount,
            entry.reason,
            entry.note,
            entry.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn insert_hack_log(conn: &Connection, user: UserRef, entry: &HackLogEntry) -> rusqlite::Result<()> {
    let duration_ms = i64::try_from(entry.duration.as_millis()).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO hack_log (user_id, guild_id, difficulty, duration_ms, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            key(user.user.0),
            key(user.scope.0),
            entry.difficulty.as_str(),
            duration_ms,
            entry.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        user: UserRef::new(row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64),
        xp: to_u64(row.get(2)?),
        level: u8::try_from(row.get::<_, i64>(3)?).unwrap_or(u8::MAX),
        hacks_completed: to_u64(row.get(4)?),
        last_online_at: row.get(5)?,
        last_hack_at: row.get(6)?,
        last_daily_bonus_at: row.get(7)?,
        daily_xp_earned: to_u64(row.get(8)?),
        daily_reset_on: row.get(9)?,
        last_bypass_at: row.get(10)?,
    })
}

/// Platform ids are stored bit-for-bit in SQLite's signed integers.
fn key(id: u64) -> i64 {
    id as i64
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = LevelStore::open_in_memory().await.unwrap();
        let user = UserRef::new(42, 7);

        assert_eq!(store.get(user).await.unwrap(), None);
        let first = store.get_or_create(user).await.unwrap();
        assert_eq!(first, Account::new(user));

        let mut changed = first.clone();
        changed.xp = 120;
        changed.level = 1;
        changed.last_online_at = Some(at(9, 30));
        changed.daily_reset_on = Some(at(9, 30).date_naive());
        store.update(&changed).await.unwrap();

        assert_eq!(store.get_or_create(user).await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_large_platform_ids_round_trip() {
        let store = LevelStore::open_in_memory().await.unwrap();
        let user = UserRef::new(u64::MAX - 3, 1 << 62);
        assert_eq!(store.get_or_create(user).await.unwrap().user, user);
    }

    #[tokio::test]
    async fn test_commit_writes_logs() {
        let store = LevelStore::open_in_memory().await.unwrap();
        let user = UserRef::new(1, 1);
        let mut account = store.get_or_create(user).await.unwrap();
        account.xp = 50;

        store
            .commit(
                &account,
                Some(XpLogEntry::new(50, "hack_success", None, at(12, 0))),
                Some(HackLogEntry { difficulty: Difficulty::Easy, duration: Duration::from_secs(20), created_at: at(12, 0) }),
            )
            .await
            .unwrap();

        assert_eq!(store.get(user).await.unwrap().unwrap().xp, 50);
        assert_eq!(store.count_hacks_since(user, at(11, 0)).await.unwrap(), 1);
        assert_eq!(store.count_hacks_since(user, at(12, 1)).await.unwrap(), 0);
        assert_eq!(store.count_xp_log_since(user, "hack_success", at(0, 0)).await.unwrap(), 1);
        assert_eq!(store.count_xp_log_since(user, "login_bonus", at(0, 0)).await.unwrap(), 0);

        let log = store.recent_xp_log(user, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].created_at, at(12, 0));
    }

    #[tokio::test]
    async fn test_top_n_orders_by_level_then_xp() {
        let store = LevelStore::open_in_memory().await.unwrap();
        for (id, xp, level) in [(1, 150, 1), (2, 700, 3), (3, 250, 1), (4, 9000, 4)] {
            let mut a = store.get_or_create(UserRef::new(id, 5)).await.unwrap();
            a.xp = xp;
            a.level = level;
            store.update(&a).await.unwrap();
        }
        // Different scope never shows up.
        store.get_or_create(UserRef::new(9, 6)).await.unwrap();

        let top: Vec<u64> = store
            .top_n(5, 3)
            .await
            .unwrap()
            .iter()
            .map(|a| a.user.user.0)
            .collect();
        assert_eq!(top, vec![4, 2, 3]);
    }

    fn temp_db() -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("hackshell-store-{}", uuid::Uuid::new_v4()));
        let path = dir.join("levels.sqlite3");
        (dir, path)
    }

    /// Take the write lock from a second connection and release it after `hold`.
    fn hold_write_lock(path: &Path, hold: Duration) -> std::thread::JoinHandle<()> {
        let blocker = Connection::open(path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();
        std::thread::spawn(move || {
            std::thread::sleep(hold);
            blocker.execute_batch("COMMIT").unwrap();
        })
    }

    #[tokio::test]
    async fn test_narrow_lookups() {
        let store = LevelStore::open_in_memory().await.unwrap();
        let user = UserRef::new(11, 2);
        assert_eq!(store.level(user).await.unwrap(), None);
        assert_eq!(store.last_bypass_at(user).await.unwrap(), None);

        let mut account = store.get_or_create(user).await.unwrap();
        account.level = 3;
        account.last_bypass_at = Some(at(8, 15));
        store.update(&account).await.unwrap();

        assert_eq!(store.level(user).await.unwrap(), Some(3));
        assert_eq!(store.last_bypass_at(user).await.unwrap(), Some(at(8, 15)));
    }

    #[tokio::test]
    async fn test_busy_write_is_retried() {
        let (dir, path) = temp_db();
        let store = LevelStore::open(&path).await.unwrap();
        let user = UserRef::new(8, 8);
        let mut account = store.get_or_create(user).await.unwrap();
        account.xp = 10;

        let holder = hold_write_lock(&path, Duration::from_millis(400));
        let started = std::time::Instant::now();
        store.update(&account).await.unwrap();
        // One attempt alone gives up after the 250ms busy timeout.
        assert!(started.elapsed() >= Duration::from_millis(300));
        holder.join().unwrap();

        assert_eq!(store.get(user).await.unwrap().unwrap().xp, 10);
        drop(store);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_busy_write_gives_up_after_three_attempts() {
        let (dir, path) = temp_db();
        let store = LevelStore::open(&path).await.unwrap();
        let user = UserRef::new(9, 9);
        let account = store.get_or_create(user).await.unwrap();

        let holder = hold_write_lock(&path, Duration::from_millis(1500));
        let started = std::time::Instant::now();
        match store.update(&account).await {
            Err(StoreError::Sqlite(e)) => assert_eq!(e.sqlite_error_code(), Some(ErrorCode::DatabaseBusy)),
            other => panic!("unexpected {:?}", other),
        }
        // Three busy timeouts plus two backoffs.
        assert!(started.elapsed() >= Duration::from_millis(850));
        holder.join().unwrap();

        drop(store);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let (dir, path) = temp_db();

        let store = LevelStore::open(&path).await.unwrap();
        store.get_or_create(UserRef::new(3, 3)).await.unwrap();
        drop(store);

        let reopened = LevelStore::open(&path).await.unwrap();
        assert!(reopened.get(UserRef::new(3, 3)).await.unwrap().is_some());
        drop(reopened);
        let _ = std::fs::remove_dir_all(dir);
    }
}
