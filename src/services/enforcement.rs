// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic deadline enforcement.
//!
//! Every sweep walks all memberships and moves them between Active,
//! Probation, Immune and Banned. A sweep is a pure function of the store
//! and `now`, so running it again without new evidence changes nothing.
//!
//! Bans go through the chat platform first. If the removal fails the
//! membership is left untouched and the next sweep tries again. Once the
//! removal succeeded the Banned status is written no matter what.

use crate::config::EnginePolicy;
use crate::db::TimelineStore;
use crate::error::AppError;
use crate::models::{Event, EventKind, Membership, MembershipStatus, Source, User, Workout};
use crate::time_utils::{format_utc_rfc3339, local_date};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};

use crate::services::notifier::Notifier;

/// Counts from one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Another sweep was still running; nothing was done.
    pub skipped: bool,
    pub memberships_checked: usize,
    pub warned: usize,
    pub banned: usize,
    pub reactivated: usize,
    pub immunity_consumed: usize,
    pub leaders_announced: usize,
    pub failures: usize,
}

/// What the sweep decided for one membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Skip,
    /// Warn about the cycle starting at this instant.
    Warn(DateTime<Utc>),
    Ban,
    Reactivate,
    ConsumeImmunity,
}

pub struct EnforcementScheduler {
    store: Arc<dyn TimelineStore>,
    notifier: Arc<dyn Notifier>,
    policy: EnginePolicy,
    running: Mutex<()>,
}

impl EnforcementScheduler {
    pub fn new(store: Arc<dyn TimelineStore>, notifier: Arc<dyn Notifier>, policy: EnginePolicy) -> Self {
        Self {
            store,
            notifier,
            policy,
            running: Mutex::new(()),
        }
    }

    /// Run one sweep at `now`. Returns immediately with `skipped` set if a
    /// sweep is already in progress.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::info!("Sweep already running, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..Default::default()
            });
        };

        let mut report = SweepReport::default();
        let users = self.store.list_users().await?;
        let mut groups = BTreeSet::new();

        for user in &users {
            for membership in &user.memberships {
                groups.insert(membership.group_id.clone());
                report.memberships_checked += 1;
                if let Err(e) = self.enforce(user, membership, now, &mut report).await {
                    report.failures += 1;
                    log_sweep_failure(&user.id, &membership.group_id, &e);
                }
            }
        }

        for group_id in &groups {
            match self.announce_weekly_leader(group_id, now).await {
                Ok(true) => report.leaders_announced += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(group_id, error = %e, "Weekly leader check failed");
                }
            }
        }

        tracing::info!(?report, "Sweep finished");
        Ok(report)
    }

    /// Enforce one membership as observed at the start of the sweep.
    ///
    /// Status changes are written field by field against the stored user,
    /// so token refreshes and admin actions made meanwhile survive.
    async fn enforce(
        &self,
        user: &User,
        membership: &Membership,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), AppError> {
        let group_id = membership.group_id.as_str();

        match self.evaluate(&user.id, membership, now).await? {
            Verdict::Skip => {}
            Verdict::Reactivate => {
                if self
                    .transition(&user.id, group_id, Some(MembershipStatus::Probation), MembershipStatus::Active)
                    .await?
                {
                    report.reactivated += 1;
                    tracing::info!(user_id = %user.id, group_id, "Probation passed");
                }
            }
            Verdict::ConsumeImmunity => {
                if self.consume_immunity(user, group_id, now).await? {
                    report.immunity_consumed += 1;
                }
            }
            Verdict::Warn(cycle) => {
                self.warn(user, group_id, cycle, now).await?;
                report.warned += 1;
            }
            Verdict::Ban => {
                // Removal cannot be undone, so act only on the stored status.
                if !self.unchanged_since_snapshot(&user.id, membership).await? {
                    tracing::info!(user_id = %user.id, group_id, "Membership changed during sweep, leaving it");
                    return Ok(());
                }
                if self.ban(user, group_id, now).await? {
                    report.banned += 1;
                } else {
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn evaluate(
        &self,
        user_id: &str,
        membership: &Membership,
        now: DateTime<Utc>,
    ) -> Result<Verdict, AppError> {
        let group_id = membership.group_id.as_str();
        let deadline = self.policy.deadline();

        match membership.status {
            MembershipStatus::Banned => Ok(Verdict::Skip),
            MembershipStatus::Immune => Ok(Verdict::ConsumeImmunity),
            MembershipStatus::Probation => {
                // The most recent workout is the rejoin marker itself; the
                // one before it is the last real evidence.
                let recent = self.store.recent_workouts(user_id, group_id, 2).await?;
                let baseline = recent
                    .get(1)
                    .map(|w| w.created_at)
                    .unwrap_or_else(|| membership_start(membership));
                let remaining = deadline - (now - baseline);

                if remaining > Duration::zero() {
                    return Ok(Verdict::Reactivate);
                }
                let in_grace = membership
                    .rejoined_at
                    .is_some_and(|at| now - at < self.policy.rejoin_grace);
                Ok(if in_grace { Verdict::Skip } else { Verdict::Ban })
            }
            MembershipStatus::Active => {
                if now - membership.joined_at < self.policy.new_member_grace {
                    return Ok(Verdict::Skip);
                }

                let cycle = self.cycle_start(user_id, membership).await?;
                let remaining = deadline - (now - cycle);

                if remaining < Duration::zero() {
                    Ok(Verdict::Ban)
                } else if remaining <= self.policy.warning_lead
                    && !self
                        .store
                        .has_cycle_event(group_id, user_id, EventKind::LastDayNotice, cycle)
                        .await?
                {
                    Ok(Verdict::Warn(cycle))
                } else {
                    Ok(Verdict::Skip)
                }
            }
        }
    }

    /// Start of the current deadline cycle: the latest workout, or the
    /// membership start if there is none.
    async fn cycle_start(&self, user_id: &str, membership: &Membership) -> Result<DateTime<Utc>, AppError> {
        Ok(self
            .store
            .recent_workouts(user_id, &membership.group_id, 1)
            .await?
            .first()
            .map(|w| w.created_at)
            .unwrap_or_else(|| membership_start(membership)))
    }

    async fn unchanged_since_snapshot(&self, user_id: &str, membership: &Membership) -> Result<bool, AppError> {
        let stored = self.store.get_user(user_id).await?;
        Ok(stored
            .as_ref()
            .and_then(|u| u.membership(&membership.group_id))
            .is_some_and(|m| m.status == membership.status))
    }

    /// Set the membership status to `to` if it is still `from` (or anything
    /// but `to` when `from` is `None`). Returns whether it was written.
    async fn transition(
        &self,
        user_id: &str,
        group_id: &str,
        from: Option<MembershipStatus>,
        to: MembershipStatus,
    ) -> Result<bool, AppError> {
        let mut applied = false;
        let mut apply = |user: &mut User| {
            let Some(m) = user.membership_mut(group_id) else {
                return false;
            };
            if m.status == to || from.is_some_and(|f| m.status != f) {
                return false;
            }
            m.status = to;
            applied = true;
            true
        };
        self.store.update_user(user_id, &mut apply).await?;

        if !applied {
            tracing::info!(user_id, group_id, ?to, "Membership changed during sweep, leaving it");
        }
        Ok(applied)
    }

    async fn consume_immunity(&self, user: &User, group_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let previous = self.store.recent_workouts(&user.id, group_id, 1).await?;
        let mut placeholder = Workout::synthetic(&user.id, group_id, now, Source::Immunity);
        placeholder.streak = previous.first().and_then(|w| w.streak);
        self.store.put_workout(&placeholder).await?;

        let consumed = match self
            .transition(&user.id, group_id, Some(MembershipStatus::Immune), MembershipStatus::Active)
            .await
        {
            Ok(consumed) => consumed,
            Err(e) => {
                self.discard_placeholder(&placeholder).await;
                return Err(e);
            }
        };
        if !consumed {
            self.discard_placeholder(&placeholder).await;
            return Ok(false);
        }
        tracing::info!(user_id = %user.id, group_id, "Immunity consumed");

        let message = format!("{} is covered by immunity this cycle.", user.display_name);
        if let Err(e) = self.notifier.announce(group_id, &message).await {
            tracing::warn!(group_id, error = %e, "Failed to announce immunity");
        }
        Ok(true)
    }

    async fn discard_placeholder(&self, placeholder: &Workout) {
        if let Err(e) = self.store.delete_workout(&placeholder.id).await {
            tracing::error!(
                workout_id = %placeholder.id,
                error = %AppError::Consistency(e.to_string()),
                "Unused immunity placeholder left behind"
            );
        }
    }

    async fn warn(&self, user: &User, group_id: &str, cycle: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppError> {
        let due = cycle + self.policy.deadline();
        let message = format!(
            "Last day! Log a workout before {} to stay in the group.",
            format_utc_rfc3339(due)
        );
        self.notifier.notify_user(&user.id, &message).await?;

        // Only recorded once the warning is out, so a failed send retries.
        self.store
            .append_event(&Event::new(&user.id, group_id, EventKind::LastDayNotice, now).for_cycle(cycle))
            .await?;
        tracing::info!(user_id = %user.id, group_id, due = %format_utc_rfc3339(due), "Deadline warning sent");
        Ok(())
    }

    /// Remove the member from the chat, then mark them banned. Returns
    /// `false` (leaving state untouched) if the removal failed.
    ///
    /// Once the removal went through the ban is stored whatever the
    /// membership looks like by now; only the audit event is best effort.
    async fn ban(&self, user: &User, group_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        if let Err(e) = self.notifier.remove_member(&user.id, group_id).await {
            tracing::error!(
                user_id = %user.id,
                group_id,
                error = %AppError::Consistency(format!("removal failed: {}", e)),
                "Ban aborted"
            );
            return Ok(false);
        }

        if let Err(e) = self
            .transition(&user.id, group_id, None, MembershipStatus::Banned)
            .await
        {
            return Err(AppError::Consistency(format!(
                "removed from chat but ban not stored: {}",
                e
            )));
        }
        tracing::info!(user_id = %user.id, group_id, "Member banned");

        if let Err(e) = self
            .store
            .append_event(&Event::new(&user.id, group_id, EventKind::Ban, now))
            .await
        {
            tracing::error!(user_id = %user.id, group_id, error = %e, "Ban event not recorded");
        }

        let message = format!("{} missed the deadline and was removed.", user.display_name);
        if let Err(e) = self.notifier.announce(group_id, &message).await {
            tracing::warn!(group_id, error = %e, "Failed to announce ban");
        }
        Ok(true)
    }

    /// Announce the most active member of the past 7 days, once per ISO week.
    async fn announce_weekly_leader(&self, group_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let week_start = self.week_start(now);
        if self
            .store
            .has_event_since(group_id, None, EventKind::WeeklyLeader, week_start)
            .await?
        {
            return Ok(false);
        }

        let workouts = self
            .store
            .group_workouts_since(group_id, now - Duration::days(7))
            .await?;
        let Some((leader, count)) = weekly_leader(&workouts) else {
            return Ok(false);
        };

        let name = match self.store.get_user(&leader).await? {
            Some(user) => user.display_name,
            None => leader.clone(),
        };
        self.notifier
            .announce(
                group_id,
                &format!("Workout leader of the week: {} with {} workouts!", name, count),
            )
            .await?;
        self.store
            .append_event(&Event::new(&leader, group_id, EventKind::WeeklyLeader, now))
            .await?;
        Ok(true)
    }

    /// Monday 00:00 of the current ISO week, in the configured day offset.
    fn week_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let offset = self.policy.day_offset;
        let today = local_date(now, offset);
        let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        offset
            .from_local_datetime(&monday.and_time(NaiveTime::MIN))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now)
    }
}

fn membership_start(membership: &Membership) -> DateTime<Utc> {
    membership.rejoined_at.unwrap_or(membership.joined_at)
}

/// Member with the most real (non-placeholder) workouts. Ties go to the
/// lexicographically smallest user id so repeated sweeps agree.
fn weekly_leader(workouts: &[Workout]) -> Option<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in workouts.iter().filter(|w| !w.source.is_synthetic()) {
        *counts.entry(w.user_id.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(user, count)| (user.to_string(), count))
}

fn log_sweep_failure(user_id: &str, group_id: &str, err: &AppError) {
    if err.is_transient() {
        tracing::warn!(user_id, group_id, error = %err, "Membership check deferred");
    } else {
        tracing::error!(user_id, group_id, error = %err, "Membership check failed");
    }
}

/// Run sweeps on a fixed interval until shutdown is signalled.
pub async fn run_enforcement_loop(
    scheduler: Arc<EnforcementScheduler>,
    every: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "Enforcement loop started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Enforcement loop shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = scheduler.sweep(Utc::now()).await {
                    tracing::warn!(error = %e, "Sweep failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workout(user: &str, source: Source) -> Workout {
        let mut w = Workout::manual(user, "g1", Utc::now());
        w.source = source;
        w
    }

    #[test]
    fn test_weekly_leader_ignores_placeholders() {
        let workouts = vec![
            workout("alice", Source::Manual),
            workout("bob", Source::Garmin),
            workout("bob", Source::Immunity),
            workout("bob", Source::Rejoin),
            workout("alice", Source::Whoop),
            workout("carol", Source::Manual),
        ];
        assert_eq!(weekly_leader(&workouts), Some(("alice".to_string(), 2)));
    }

    #[test]
    fn test_weekly_leader_tie_is_stable() {
        let workouts = vec![workout("zed", Source::Manual), workout("amy", Source::Manual)];
        assert_eq!(weekly_leader(&workouts), Some(("amy".to_string(), 1)));
        assert_eq!(weekly_leader(&[]), None);
    }

    #[test]
    fn test_week_start_is_monday() {
        let scheduler_policy = EnginePolicy::default();
        let store: Arc<dyn TimelineStore> = Arc::new(crate::db::MemoryStore::new());
        let notifier: Arc<dyn Notifier> = Arc::new(crate::services::notifier::LogNotifier);
        let scheduler = EnforcementScheduler::new(store, notifier, scheduler_policy);

        // Thursday 2024-03-07
        let now = Utc.with_ymd_and_hms(2024, 3, 7, 15, 0, 0).unwrap();
        assert_eq!(
            scheduler.week_start(now),
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
        );
    }
}
