//! Game Events
//!
//! User-facing events pushed to the platform layer. The core never formats
//! messages; a [`NotificationSink`] decides how an event is rendered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::core::words::Difficulty;
use crate::game::perks::PerkKind;
use crate::game::puzzle::{ScopeId, UserId, UserRef};

/// Event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameEvent {
    /// User opened a session.
    LoggedIn {
        alias: String,
        bonus_xp: u64,
        level: u8,
    },

    /// User closed their session.
    LoggedOut,

    /// A puzzle is live.
    PuzzleStarted {
        scramble: String,
        duration_secs: u64,
        difficulty: Difficulty,
    },

    /// Guess was wrong, attempts remain.
    WrongGuess {
        attempts_left: u8,
        hint: Option<String>,
    },

    /// Puzzle solved.
    Success {
        xp_awarded: u64,
        new_level: u8,
        leveled_up: bool,
        note: Option<String>,
    },

    /// All attempts spent. Reveals the answer.
    Failure { answer: String },

    /// Deadline passed. Reveals the answer.
    TimedOut { answer: String },

    /// Puzzle abandoned. Never reveals the answer.
    Aborted,

    /// A perk took effect.
    PerkApplied { perk: PerkKind, detail: String },

    /// A perk was refused.
    PerkDenied { perk: PerkKind, reason: String },
}

impl GameEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::LoggedIn { .. } => "logged_in",
            GameEvent::LoggedOut => "logged_out",
            GameEvent::PuzzleStarted { .. } => "puzzle_started",
            GameEvent::WrongGuess { .. } => "wrong_guess",
            GameEvent::Success { .. } => "success",
            GameEvent::Failure { .. } => "failure",
            GameEvent::TimedOut { .. } => "timed_out",
            GameEvent::Aborted => "aborted",
            GameEvent::PerkApplied { .. } => "perk_applied",
            GameEvent::PerkDenied { .. } => "perk_denied",
        }
    }

    /// The answer disclosed by this event, if any.
    pub fn revealed_answer(&self) -> Option<&str> {
        match self {
            GameEvent::Failure { answer } | GameEvent::TimedOut { answer } => Some(answer),
            _ => None,
        }
    }

    /// True for events that end a puzzle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GameEvent::Success { .. }
                | GameEvent::Failure { .. }
                | GameEvent::TimedOut { .. }
                | GameEvent::Aborted
        )
    }
}

/// An event addressed to a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient.
    pub user: UserId,
    /// Scope the recipient is playing in.
    pub scope: ScopeId,
    /// When the event was produced.
    pub at: DateTime<Utc>,
    /// Event data.
    pub event: GameEvent,
}

impl Notification {
    /// Create a notification stamped now.
    pub fn new(user: UserRef, event: GameEvent) -> Self {
        Self {
            user: user.user,
            scope: user.scope,
            at: Utc::now(),
            event,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receiver of user-facing events.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification. Must not block.
    fn notify(&self, notification: Notification);
}

/// Forwards notifications into an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is listening any more.
        let _ = self.sender.send(notification);
    }
}

/// Logs notifications as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification.to_json() {
            Ok(json) => info!(user = notification.user.0, event = notification.event.name(), "{}", json),
            Err(e) => info!(user = notification.user.0, "unserializable event {:?}: {}", notification.event, e),
        }
    }
}
