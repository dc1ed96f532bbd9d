//! Hackshell Demo
//!
//! Plays one scripted session against the configured database, logging every
//! event, then prints the leaderboard.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hackshell::{
    game::events::TracingSink,
    game::hint::TemplateHints,
    Difficulty, GameConfig, GuessResult, LevelStore, PerkKind, SessionManager, UserRef, XpLedger, VERSION,
};

const DEMO_SCOPE: u64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Hackshell v{}", VERSION);

    let config = GameConfig::from_env();
    info!(
        "Puzzle durations: easy {}s, hard {}s",
        config.puzzle.easy_duration.as_secs(),
        config.puzzle.hard_duration.as_secs()
    );

    let store = LevelStore::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
    let ledger = Arc::new(XpLedger::new(store, config.ledger.clone())?);

    let manager = SessionManager::new(config, ledger.clone(), Arc::new(TracingSink))
        .with_hints(Arc::new(TemplateHints::new("Rearrange \"{scramble}\", {attempts} attempts left")));

    demo_session(&manager).await?;

    info!("=== Leaderboard ===");
    for (place, account) in ledger.leaderboard(DEMO_SCOPE, 10).await?.iter().enumerate() {
        info!("#{} user {} level {} ({} XP)", place + 1, account.user.user.0, account.level, account.xp);
    }

    Ok(())
}

/// Demo function to exercise the session flow.
async fn demo_session(manager: &SessionManager) -> Result<()> {
    info!("=== Starting Demo Session ===");

    let user = UserRef::new(1001, DEMO_SCOPE);
    let login = manager.login(user, "neo").await?;
    info!("Logged in with +{} XP (level {})", login.bonus_xp, login.level);

    let start = manager.start_puzzle(user.user, Difficulty::Easy).await?;
    info!("Puzzle {}: unscramble \"{}\"", start.puzzle_id, start.scrambled);

    for guess in ["hunter2", "letmein"] {
        match manager.submit_guess(user.user, guess).await? {
            GuessResult::Wrong { attempts_left, hint } => {
                info!("\"{}\" is wrong, {} left{}", guess, attempts_left, hint.map(|h| format!(": {}", h)).unwrap_or_default());
            }
            GuessResult::Failed { answer } => info!("Out of attempts, it was \"{}\"", answer),
            GuessResult::Solved { .. } => info!("\"{}\" happened to be right", guess),
        }
    }

    match manager.use_perk(user.user, PerkKind::Reveal).await {
        Ok(result) => info!("Reveal: {:?}", result),
        Err(e) => info!("Reveal refused: {}", e),
    }

    let Some(view) = manager.snapshot(user.user).await else {
        bail!("demo puzzle ended early");
    };
    info!("{}s left, {} attempt(s), mask {}", view.seconds_left, view.attempts_remaining, view.masked);

    manager.abort(user.user).await?;
    manager.end_full_session(user.user).await?;

    info!("=== Demo Complete ===");
    Ok(())
}
