//! Letter Scrambling
//!
//! Produces the puzzle text shown to the player: a permutation of the
//! answer's letters that visibly differs from the answer.

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle attempts before falling back to reversal.
pub const MAX_SHUFFLES: usize = 20;

/// Count positions where two strings differ.
pub fn differing_positions(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).filter(|(x, y)| x != y).count()
}

/// Scramble a word.
///
/// Tries up to [`MAX_SHUFFLES`] random permutations and keeps the first that
/// differs from `word` in at least `min(2, len)` positions. Falls back to the
/// reversed word, and to the word itself when even that is identical
/// (single letters, palindromes, repeated letters).
pub fn scramble<R: Rng + ?Sized>(word: &str, rng: &mut R) -> String {
    let mut letters: Vec<char> = word.chars().collect();
    let required = letters.len().min(2);

    for _ in 0..MAX_SHUFFLES {
        letters.shuffle(rng);
        let mixed: String = letters.iter().collect();
        if mixed != word && differing_positions(&mixed, word) >= required {
            return mixed;
        }
    }

    let reversed: String = word.chars().rev().collect();
    if reversed != word {
        reversed
    } else {
        word.to_string()
    }
}
