// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Append-only audit events used to keep sweep side effects idempotent.

use crate::time_utils::fixed_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ban,
    LastDayNotice,
    WeeklyLeader,
}

/// Stored audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub group_id: String,
    pub kind: EventKind,
    #[serde(with = "fixed_millis")]
    pub at: DateTime<Utc>,
    /// Start of the deadline cycle a `LastDayNotice` warns about.
    #[serde(default, with = "fixed_millis::option")]
    pub cycle: Option<DateTime<Utc>>,
}

impl Event {
    pub fn new(user_id: &str, group_id: &str, kind: EventKind, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            group_id: group_id.to_string(),
            kind,
            at,
            cycle: None,
        }
    }

    pub fn for_cycle(mut self, cycle: DateTime<Utc>) -> Self {
        self.cycle = Some(cycle);
        self
    }
}
