//! Word Pools
//!
//! Two fixed vocabularies, one per difficulty tier, handed out in a shuffled
//! rotation so no word repeats until its tier is exhausted. Words currently
//! held by a live puzzle are tracked in [`ActiveWordRegistry`] and skipped.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Number of words in each tier.
pub const TIER_SIZE: usize = 100;

/// Easy tier: short ships, places and gameplay nouns.
pub static EASY_WORDS: [&str; TIER_SIZE] = [
    "aurora", "mustang", "avenger", "cutlass", "gladius", "sabre", "hornet", "talon", "hawk", "corsair",
    "nomad", "titan", "pisces", "vulture", "mule", "argo", "aegis", "anvil", "origin", "drake",
    "misc", "rsi", "crusader", "tumbril", "greycat", "arccorp", "hurston", "lorville", "orison", "grimhex",
    "yela", "daymar", "cellin", "lyria", "wala", "calliope", "clio", "euterpe", "arial", "aberdeen",
    "magda", "ita", "stanton", "terra", "pyro", "salvage", "mining", "cargo", "bunker", "outpost",
    "hangar", "quantum", "jump", "mobiglas", "comms", "tressler", "baijini", "everus", "olisar", "refinery",
    "scrap", "racing", "cave", "beacon", "patrol", "escort", "skimmer", "shubin", "kiosk", "trade",
    "courier", "runner", "mercury", "msr", "carrack", "constellation", "freelancer", "prospector", "mole", "hercules",
    "valkyrie", "arrow", "prowler", "reclaimer", "buccaneer", "scorpius", "phoenix", "aquila", "taurus", "andromeda",
    "apollo", "polaris", "perseus", "nautilus", "liberator", "kraken", "javelin", "idris", "hammerhead", "eclipse",
];

/// Hard tier: longer names, places and systems.
pub static HARD_WORDS: [&str; TIER_SIZE] = [
    "caterpillar", "starfarer", "retaliator", "harbinger", "glaive", "starlifter", "genesis", "pioneer", "endeavor", "microtech",
    "newbabbage", "platform", "baijinipoint", "porttressler", "portolisar", "ursa", "vanguard", "sentinel", "redeemer", "merchantman",
    "covalex", "terminal", "office", "banshee", "kareah", "jumptown", "hydroponic", "scrapyard", "blacksite", "datavault",
    "commarray", "quantumtravel", "commlink", "signal", "harvest", "cavern", "armistice", "interdiction", "contraband", "newdeal",
    "teasa", "astroarmada", "cubbyblast", "dumpersdepot", "apex", "clouds", "icefield", "glacier", "gravlev", "quantumdrive",
    "generator", "powerplant", "cooler", "hardpoint", "marker", "waypoint", "overclock", "underclock", "firmware", "trace",
    "infiltration", "exfiltration", "decryption", "encryption", "synchronization", "configuration", "virtualization", "fragmentation", "exploitation", "reconnaissance",
    "surveillance", "transponder", "starchart", "protocols", "failsafe", "tracker", "satnetwork", "voidspace", "starlancer", "ironclad",
    "starforge", "overwatch", "navigator", "intercept", "shipyard", "drydock", "bountyhunter", "smuggler", "stormwall", "levski",
    "nyxsystem", "bengal", "polarisation", "quarantine", "checkpoint", "jumppoint", "spacestation", "cargodeck", "medbay", "tractorbeam",
];

// =============================================================================
// DIFFICULTY
// =============================================================================

/// Puzzle difficulty tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Short words, shorter clock.
    Easy,
    /// Long words, longer clock, bigger award.
    Hard,
}

impl Difficulty {
    /// Lowercase name, as stored in the hack log.
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Hard => "hard",
        }
    }

    /// Vocabulary for this tier.
    pub fn words(self) -> &'static [&'static str] {
        match self {
            Difficulty::Easy => &EASY_WORDS,
            Difficulty::Hard => &HARD_WORDS,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    /// Accepts the tier name or the shell slot number (`01`, `02`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" | "01" | "1" => Ok(Difficulty::Easy),
            "hard" | "02" | "2" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {}", other)),
        }
    }
}

// =============================================================================
// ACTIVE WORD REGISTRY
// =============================================================================

/// Words currently assigned to a live puzzle, across all users.
#[derive(Debug, Default)]
pub struct ActiveWordRegistry {
    words: BTreeSet<String>,
}

impl ActiveWordRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a word is held.
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// Reserve a word. Returns false if it was already held.
    pub fn reserve(&mut self, word: &str) -> bool {
        self.words.insert(word.to_string())
    }

    /// Release a word. Returns false if it was not held.
    pub fn release(&mut self, word: &str) -> bool {
        self.words.remove(word)
    }

    /// Number of held words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when no word is held.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

// =============================================================================
// WORD POOL
// =============================================================================

/// Shuffled rotation over one tier.
#[derive(Debug)]
struct TierQueue {
    words: &'static [&'static str],
    queue: VecDeque<&'static str>,
}

impl TierQueue {
    fn new(words: &'static [&'static str], rng: &mut StdRng) -> Self {
        let mut tier = Self { words, queue: VecDeque::with_capacity(words.len()) };
        tier.refill(rng);
        tier
    }

    fn refill(&mut self, rng: &mut StdRng) {
        let mut rotation = self.words.to_vec();
        rotation.shuffle(rng);
        self.queue.extend(rotation);
    }
}

/// Non-repeating word source for both tiers.
#[derive(Debug)]
pub struct WordPool {
    easy: TierQueue,
    hard: TierQueue,
    rng: StdRng,
}

impl Default for WordPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WordPool {
    /// Create a pool over the built-in vocabularies, seeded from entropy.
    pub fn new() -> Self {
        Self::with_rng(Difficulty::Easy.words(), Difficulty::Hard.words(), StdRng::from_entropy())
    }

    /// Create a pool with a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(Difficulty::Easy.words(), Difficulty::Hard.words(), StdRng::seed_from_u64(seed))
    }

    /// Create a pool over custom vocabularies.
    pub fn with_rng(
        easy: &'static [&'static str],
        hard: &'static [&'static str],
        mut rng: StdRng,
    ) -> Self {
        let easy = TierQueue::new(easy, &mut rng);
        let hard = TierQueue::new(hard, &mut rng);
        Self { easy, hard, rng }
    }

    /// Next word of a tier that no live puzzle holds.
    ///
    /// Active words are rotated to the back of the queue. The search covers
    /// the rest of the current rotation plus one fresh rotation; `None` means
    /// every word is taken.
    pub fn next(&mut self, difficulty: Difficulty, active: &ActiveWordRegistry) -> Option<&'static str> {
        let tier = match difficulty {
            Difficulty::Easy => &mut self.easy,
            Difficulty::Hard => &mut self.hard,
        };

        let mut skipped = Vec::new();
        let mut found = None;
        for _ in 0..2 * tier.words.len() {
            if tier.queue.is_empty() {
                // The fresh rotation already contains everything skipped so far.
                skipped.clear();
                tier.refill(&mut self.rng);
            }
            let Some(word) = tier.queue.pop_front() else { break };
            if active.contains(word) {
                skipped.push(word);
            } else {
                found = Some(word);
                break;
            }
        }

        tier.queue.extend(skipped);
        found
    }

    /// Words left in the current rotation of a tier.
    pub fn remaining(&self, difficulty: Difficulty) -> usize {
        match difficulty {
            Difficulty::Easy => self.easy.queue.len(),
            Difficulty::Hard => self.hard.queue.len(),
        }
    }
}

// =============================================================================
// WORD BANK
// =============================================================================

/// Word pool and registry behind one lock, so drawing and reserving a word
/// happen atomically.
#[derive(Debug, Default)]
pub struct WordBank {
    pool: WordPool,
    active: ActiveWordRegistry,
}

impl WordBank {
    /// Create a bank over a pool.
    pub fn new(pool: WordPool) -> Self {
        Self { pool, active: ActiveWordRegistry::new() }
    }

    /// Draw a free word and reserve it.
    pub fn draw(&mut self, difficulty: Difficulty) -> Option<String> {
        let word = self.pool.next(difficulty, &self.active)?;
        self.active.reserve(word);
        Some(word.to_string())
    }

    /// Release a reserved word.
    pub fn release(&mut self, word: &str) -> bool {
        self.active.release(word)
    }

    /// Check whether a word is reserved.
    pub fn is_active(&self, word: &str) -> bool {
        self.active.contains(word)
    }

    /// Number of reserved words.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tiers_are_distinct_and_disjoint() {
        let easy: HashSet<_> = EASY_WORDS.iter().collect();
        let hard: HashSet<_> = HARD_WORDS.iter().collect();
        assert_eq!(easy.len(), TIER_SIZE);
        assert_eq!(hard.len(), TIER_SIZE);
        assert!(easy.is_disjoint(&hard));
        assert!(EASY_WORDS
            .iter()
            .chain(HARD_WORDS.iter())
            .all(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn test_full_rotation_before_repeat() {
        let mut bank = WordBank::new(WordPool::with_seed(7));

        let drawn: HashSet<_> = (0..TIER_SIZE)
            .map(|_| {
                let word = bank.draw(Difficulty::Easy).unwrap();
                assert!(bank.release(&word));
                word
            })
            .collect();
        assert_eq!(drawn.len(), TIER_SIZE);
        assert_eq!(bank.pool.remaining(Difficulty::Easy), 0);

        // Next draw starts a fresh rotation.
        assert!(bank.draw(Difficulty::Easy).is_some());
        assert_eq!(bank.pool.remaining(Difficulty::Easy), TIER_SIZE - 1);
    }

    #[test]
    fn test_never_returns_active_word() {
        let mut bank = WordBank::new(WordPool::with_seed(11));

        let mut held = Vec::new();
        for _ in 0..60 {
            let word = bank.draw(Difficulty::Hard).unwrap();
            assert!(!held.contains(&word));
            held.push(word);
        }
        assert_eq!(bank.active_count(), 60);

        // Release half, keep drawing: held words never come back.
        for word in held.drain(..30) {
            assert!(bank.release(&word));
        }
        for _ in 0..200 {
            let word = bank.draw(Difficulty::Hard).unwrap();
            assert!(!held.contains(&word));
            bank.release(&word);
        }
    }

    #[test]
    fn test_pool_exhausted_when_all_active() {
        let mut bank = WordBank::new(WordPool::with_seed(3));
        for _ in 0..TIER_SIZE {
            assert!(bank.draw(Difficulty::Easy).is_some());
        }
        assert_eq!(bank.draw(Difficulty::Easy), None);

        // The other tier is unaffected.
        assert!(bank.draw(Difficulty::Hard).is_some());

        bank.release(EASY_WORDS[42]);
        assert_eq!(bank.draw(Difficulty::Easy).as_deref(), Some(EASY_WORDS[42]));
    }

    #[test]
    fn test_free_word_found_across_rotations() {
        static PAIR: [&str; 2] = ["owl", "yak"];
        let mut bank = WordBank::new(WordPool::with_rng(&PAIR, &PAIR, StdRng::seed_from_u64(5)));

        let first = bank.draw(Difficulty::Easy).unwrap();
        let held = bank.draw(Difficulty::Easy).unwrap();
        assert_ne!(first, held);
        bank.release(&first);

        for _ in 0..10 {
            let word = bank.draw(Difficulty::Easy).unwrap();
            assert_eq!(word, first);
            bank.release(&word);
        }
        assert!(bank.is_active(&held));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut registry = ActiveWordRegistry::new();
        assert!(registry.reserve("aurora"));
        assert!(!registry.reserve("aurora"));
        assert!(registry.release("aurora"));
        assert!(!registry.release("aurora"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_difficulty_parse() {
        assert_eq!("01".parse::<Difficulty>(), Ok(Difficulty::Easy));
        assert_eq!("HARD".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("03".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::Hard.to_string(), "hard");
    }
}
