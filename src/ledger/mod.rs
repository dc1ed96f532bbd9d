//! XP Ledger
//!
//! Persistent accounts, level thresholds and the award rules.

pub mod levels;
pub mod service;
pub mod store;

pub use levels::{LevelTable, LevelTableError};
pub use service::{Award, HackAward, Rank, XpLedger};
pub use store::{Account, HackLogEntry, LevelStore, XpLogEntry};
