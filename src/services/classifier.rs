// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Decides what an admitted activity means for the user.
//!
//! Order matters: a matching manual upload wins over everything, then the
//! noise filter, then the same-day (bonus) check.

use crate::config::{ConfirmationPolicy, EnginePolicy};
use crate::db::TimelineStore;
use crate::error::AppError;
use crate::models::{ActivityRecord, User, Workout};
use crate::time_utils::local_date;
use std::sync::Arc;

const RESTING_HR: f64 = 60.0;
const MAX_HR: f64 = 190.0;
const MAX_STRAIN: f64 = 21.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Attach the activity to these manual workouts instead of creating one.
    Merge(Vec<Workout>),
    Drop(FilterReason),
    /// Park and ask the user first.
    NeedsConfirmation,
    CommitPrimary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    TooShort,
    LowStrain,
}

/// Store lookups the decision depends on.
#[derive(Debug, Default, Clone)]
pub struct ClassifierContext {
    /// Unclaimed manual workouts overlapping the activity window
    pub manual_matches: Vec<Workout>,
    /// Most recent committed workout of each active group
    pub latest: Vec<Workout>,
}

/// Heart-rate based strain estimate on the 0-21 scale.
pub fn estimate_strain(avg_hr: f64) -> f64 {
    if avg_hr < RESTING_HR {
        return 0.0;
    }
    ((avg_hr - RESTING_HR) / (MAX_HR - RESTING_HR) * MAX_STRAIN).clamp(0.0, MAX_STRAIN)
}

/// Reported strain if the provider has one, otherwise the estimate.
pub fn effective_strain(record: &ActivityRecord) -> f64 {
    record
        .strain
        .unwrap_or_else(|| estimate_strain(record.avg_hr))
}

/// Pure classification over already-fetched context.
pub fn decide(record: &ActivityRecord, policy: &EnginePolicy, ctx: ClassifierContext) -> Classification {
    if !ctx.manual_matches.is_empty() {
        return Classification::Merge(ctx.manual_matches);
    }

    let minimums = policy.minimums(record.provider);
    if record.duration_seconds < minimums.min_duration_secs {
        return Classification::Drop(FilterReason::TooShort);
    }
    if effective_strain(record) < minimums.min_strain {
        return Classification::Drop(FilterReason::LowStrain);
    }

    let day = local_date(record.start_time, policy.day_offset);
    let is_bonus = ctx
        .latest
        .iter()
        .any(|w| local_date(w.created_at, policy.day_offset) == day);

    if is_bonus || policy.confirmation == ConfirmationPolicy::Always {
        Classification::NeedsConfirmation
    } else {
        Classification::CommitPrimary
    }
}

#[derive(Clone)]
pub struct Classifier {
    store: Arc<dyn TimelineStore>,
    policy: EnginePolicy,
}

impl Classifier {
    pub fn new(store: Arc<dyn TimelineStore>, policy: EnginePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn classify(&self, user: &User, record: &ActivityRecord) -> Result<Classification, AppError> {
        let ctx = self.gather(user, record).await?;
        Ok(decide(record, &self.policy, ctx))
    }

    async fn gather(&self, user: &User, record: &ActivityRecord) -> Result<ClassifierContext, AppError> {
        let margin = self.policy.merge_margin;
        let from = record.start_time - margin;
        let to = record.end_time() + margin;

        let mut ctx = ClassifierContext::default();
        for group_id in user.active_group_ids() {
            let overlapping = self
                .store
                .workouts_between(&user.id, &group_id, from, to)
                .await?;
            ctx.manual_matches
                .extend(overlapping.into_iter().filter(Workout::is_unclaimed_manual));

            if let Some(latest) = self
                .store
                .recent_workouts(&user.id, &group_id, 1)
                .await?
                .into_iter()
                .next()
            {
                ctx.latest.push(latest);
            }
        }
        Ok(ctx)
    }
}
