// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fixed rank ladder.
//!
//! The table is immutable and ordered by threshold; all access goes through
//! the lookup functions below.

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankTier {
    pub name: &'static str,
    /// Cumulative qualifying days needed to hold this tier
    pub min_days: i64,
}

pub const RANKS: &[RankTier] = &[
    RankTier { name: "Rookie", min_days: 0 },
    RankTier { name: "Regular", min_days: 7 },
    RankTier { name: "Committed", min_days: 14 },
    RankTier { name: "Dedicated", min_days: 30 },
    RankTier { name: "Athlete", min_days: 60 },
    RankTier { name: "Iron", min_days: 90 },
    RankTier { name: "Titan", min_days: 180 },
    RankTier { name: "Legend", min_days: 365 },
];

/// Tier at `index`, if it exists.
pub fn tier(index: usize) -> Option<&'static RankTier> {
    RANKS.get(index)
}

/// Index of the tier called `name` (case-insensitive).
pub fn tier_by_name(name: &str) -> Option<usize> {
    RANKS.iter().position(|t| t.name.eq_ignore_ascii_case(name))
}

/// The tier above `index`, or `None` at the top of the ladder.
pub fn next_tier(index: usize) -> Option<&'static RankTier> {
    RANKS.get(index + 1)
}

/// Display name for `index`, clamped to the top tier.
pub fn name_of(index: usize) -> &'static str {
    tier(index).unwrap_or(&RANKS[RANKS.len() - 1]).name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_ordered() {
        assert!(RANKS.windows(2).all(|w| w[0].min_days < w[1].min_days));
        assert_eq!(RANKS[0].min_days, 0);
    }

    #[test]
    fn test_lookups() {
        assert_eq!(tier_by_name("iron"), Some(5));
        assert_eq!(tier_by_name("nope"), None);
        assert_eq!(next_tier(0).map(|t| t.name), Some("Regular"));
        assert!(next_tier(RANKS.len() - 1).is_none());
        assert_eq!(name_of(999), "Legend");
    }
}
