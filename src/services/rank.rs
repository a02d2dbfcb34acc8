// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Time-in-tier rank progression.

use crate::error::AppError;
use crate::models::rank::{self, RANKS};
use crate::models::User;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankChange {
    /// First evaluation: placed on the lowest tier and stamped.
    Initialized,
    Unchanged,
    Promoted { from: usize, to: usize },
}

/// Re-evaluate the user's rank at `now`.
///
/// A single call advances at most one tier, even if enough time passed for
/// several; the next call picks up from the new stamp.
pub fn recompute(user: &mut User, now: DateTime<Utc>) -> RankChange {
    let Some(stamp) = user.rank_changed_at else {
        user.rank_tier = 0;
        user.rank_changed_at = Some(now);
        return RankChange::Initialized;
    };

    let current = user.rank_tier.min(RANKS.len() - 1);
    let (Some(held), Some(next)) = (rank::tier(current), rank::next_tier(current)) else {
        return RankChange::Unchanged;
    };

    if (now - stamp).num_days() >= next.min_days - held.min_days {
        user.rank_tier = current + 1;
        user.rank_changed_at = Some(now);
        return RankChange::Promoted {
            from: current,
            to: current + 1,
        };
    }

    RankChange::Unchanged
}

/// Admin override: set the tier by name and restart the clock.
pub fn override_rank(user: &mut User, tier_name: &str, now: DateTime<Utc>) -> Result<usize, AppError> {
    let index = rank::tier_by_name(tier_name)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown rank '{}'", tier_name)))?;
    user.rank_tier = index;
    user.rank_changed_at = Some(now);
    Ok(index)
}
