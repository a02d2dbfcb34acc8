// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Consecutive-day streaks.
//!
//! A streak only ever looks at the previous workout: same day inherits,
//! the day after extends, anything later resets.

use crate::models::Workout;
use crate::time_utils::{days_between, local_date};
use chrono::{FixedOffset, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakOutcome {
    /// No earlier workout; the streak stays unset.
    First,
    /// Second workout of the day; carries the day's streak unchanged.
    Bonus(Option<u32>),
    Continued(u32),
    Reset,
}

impl StreakOutcome {
    /// Value stored on the new workout.
    pub fn value(&self) -> Option<u32> {
        match *self {
            StreakOutcome::First => None,
            StreakOutcome::Bonus(inherited) => inherited,
            StreakOutcome::Continued(n) => Some(n),
            StreakOutcome::Reset => Some(0),
        }
    }
}

/// Streak for a workout on `day`, given the user's previous workout in
/// the same group.
pub fn next_streak(previous: Option<&Workout>, day: NaiveDate, offset: FixedOffset) -> StreakOutcome {
    let Some(previous) = previous else {
        return StreakOutcome::First;
    };

    match days_between(local_date(previous.created_at, offset), day) {
        0 => StreakOutcome::Bonus(previous.streak),
        1 => match previous.streak {
            Some(n) if n > 0 => StreakOutcome::Continued(n + 1),
            _ => StreakOutcome::Continued(2),
        },
        _ => StreakOutcome::Reset,
    }
}
