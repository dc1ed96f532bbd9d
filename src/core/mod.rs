//! Core word primitives.
//!
//! Vocabularies, rotation and reservation of puzzle words, and scrambling.

pub mod words;
pub mod scramble;

// Re-export core types
pub use words::{ActiveWordRegistry, Difficulty, WordBank, WordPool, TIER_SIZE};
pub use scramble::scramble;
