//! Level Thresholds
//!
//! `level = max { i : xp >= thresholds[i] }`, capped at the last index.

use thiserror::Error;

/// Invalid threshold table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LevelTableError {
    /// No thresholds at all.
    #[error("threshold table is empty")]
    Empty,
    /// Level 0 must start at 0 XP.
    #[error("first threshold must be 0")]
    FirstNotZero,
    /// Thresholds must strictly increase.
    #[error("threshold {index} does not exceed the previous one")]
    NotIncreasing {
        /// Offending position.
        index: usize,
    },
}

/// Validated threshold table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    thresholds: Vec<u64>,
}

impl LevelTable {
    /// Validate and wrap a threshold list.
    pub fn new(thresholds: Vec<u64>) -> Result<Self, LevelTableError> {
        match thresholds.first() {
            None => return Err(LevelTableError::Empty),
            Some(&first) if first != 0 => return Err(LevelTableError::FirstNotZero),
            _ => {}
        }
        if let Some(index) = thresholds.windows(2).position(|w| w[1] <= w[0]) {
            return Err(LevelTableError::NotIncreasing { index: index + 1 });
        }
        Ok(Self { thresholds })
    }

    /// Level reached with `xp`.
    pub fn level_for_xp(&self, xp: u64) -> u8 {
        // partition_point counts thresholds <= xp; threshold[0] = 0 so it is >= 1.
        let reached = self.thresholds.partition_point(|&t| t <= xp);
        u8::try_from(reached.saturating_sub(1)).unwrap_or(u8::MAX)
    }

    /// Highest attainable level.
    pub fn max_level(&self) -> u8 {
        u8::try_from(self.thresholds.len() - 1).unwrap_or(u8::MAX)
    }

    /// XP needed to reach `level`, clamped to the top level.
    pub fn threshold(&self, level: u8) -> u64 {
        let index = usize::from(level).min(self.thresholds.len() - 1);
        self.thresholds[index]
    }

    /// Threshold of the level after the one `xp` reaches, `None` at the top.
    pub fn next_threshold(&self, xp: u64) -> Option<u64> {
        let next = usize::from(self.level_for_xp(xp)) + 1;
        self.thresholds.get(next).copied()
    }

    /// XP still missing for the next level, `None` at the top.
    pub fn xp_to_next(&self, xp: u64) -> Option<u64> {
        self.next_threshold(xp).map(|t| t - xp)
    }
}

impl Default for LevelTable {
    fn default() -> Self {
        Self { thresholds: vec![0, 100, 300, 600, 1000] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_level_boundaries() {
        let table = LevelTable::default();
        assert_eq!(table.level_for_xp(0), 0);
        assert_eq!(table.level_for_xp(99), 0);
        assert_eq!(table.level_for_xp(100), 1);
        assert_eq!(table.level_for_xp(299), 1);
        assert_eq!(table.level_for_xp(300), 2);
        assert_eq!(table.level_for_xp(999), 3);
        assert_eq!(table.level_for_xp(1000), 4);
        assert_eq!(table.level_for_xp(50_000), 4);
    }

    #[test]
    fn test_xp_to_next() {
        let table = LevelTable::default();
        assert_eq!(table.xp_to_next(0), Some(100));
        assert_eq!(table.xp_to_next(250), Some(50));
        assert_eq!(table.xp_to_next(1000), None);
        assert_eq!(table.threshold(3), 600);
        assert_eq!(table.threshold(9), 1000);
        assert_eq!(table.max_level(), 4);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert_eq!(LevelTable::new(vec![]), Err(LevelTableError::Empty));
        assert_eq!(LevelTable::new(vec![10, 100]), Err(LevelTableError::FirstNotZero));
        assert_eq!(
            LevelTable::new(vec![0, 100, 100]),
            Err(LevelTableError::NotIncreasing { index: 2 })
        );
        assert!(LevelTable::new(vec![0]).is_ok());
    }

    proptest! {
        #[test]
        fn prop_level_is_monotonic(a in 0u64..5_000, b in 0u64..5_000) {
            let table = LevelTable::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(table.level_for_xp(lo) <= table.level_for_xp(hi));
        }

        #[test]
        fn prop_level_matches_threshold(xp in 0u64..5_000) {
            let table = LevelTable::default();
            let level = table.level_for_xp(xp);
            prop_assert!(xp >= table.threshold(level));
            if let Some(next) = table.next_threshold(xp) {
                prop_assert!(xp < next);
            }
        }
    }
}
