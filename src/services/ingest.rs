// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity ingestion pipeline.
//!
//! Handles the core workflow:
//! 1. Resolve the user behind a provider account
//! 2. Fetch and normalize the activity
//! 3. Pass it through the idempotency gate
//! 4. Classify it and carry out the decision
//! 5. Update streaks and rank, then announce

use crate::config::EnginePolicy;
use crate::db::TimelineStore;
use crate::error::{AppError, Result};
use crate::models::{ActivityRecord, Provider, User, Workout};
use crate::services::classifier::{effective_strain, Classification, Classifier, FilterReason};
use crate::services::gate::{Admission, DropReason, IdempotencyGate};
use crate::services::lock::TtlStore;
use crate::services::normalizer::{normalize_external_id, normalize_garmin, normalize_whoop};
use crate::services::notifier::Notifier;
use crate::services::providers::garmin::{GarminActivitiesPayload, GarminActivityEntry};
use crate::services::providers::whoop::{WhoopWebhookEvent, WhoopWorkout};
use crate::services::providers::ProviderService;
use crate::services::rank::{self, RankChange};
use crate::services::streak::next_streak;
use crate::time_utils::local_date;
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Provider entries processed concurrently per webhook delivery.
const PROVIDER_CONCURRENCY: usize = 8;

/// Longest activity considered when matching a manual upload to a
/// provider workout.
const MAX_ACTIVITY_SPAN_HOURS: i64 = 24;

const WHOOP_SCORED: &str = "SCORED";

/// What happened to one activity.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Committed { workouts: usize },
    Merged { workouts: usize },
    AwaitingConfirmation,
    Duplicate(DropReason),
    Filtered(FilterReason),
}

/// Tally of one webhook delivery or sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub committed: usize,
    pub merged: usize,
    pub parked: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub failed: usize,
}

impl IngestReport {
    pub fn tally(&mut self, result: &Result<IngestOutcome>) {
        self.received += 1;
        match result {
            Ok(IngestOutcome::Committed { .. }) => self.committed += 1,
            Ok(IngestOutcome::Merged { .. }) => self.merged += 1,
            Ok(IngestOutcome::AwaitingConfirmation) => self.parked += 1,
            Ok(IngestOutcome::Duplicate(_)) => self.duplicates += 1,
            Ok(IngestOutcome::Filtered(_)) => self.filtered += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManualOutcome {
    /// The photo was attached to an existing provider workout.
    Attached { workout_id: String },
    Committed(Workout),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Committed { workouts: usize },
    Declined,
    /// Someone else already answered or the activity got committed anyway.
    AlreadyResolved,
}

/// Log a per-item failure at the level its kind deserves.
pub fn log_failure(provider: Provider, item: &str, err: &AppError) {
    match err {
        AppError::Validation(_) => {
            tracing::debug!(%provider, item, error = %err, "Activity rejected")
        }
        AppError::NotFound(_) => {
            tracing::info!(%provider, item, error = %err, "Activity skipped")
        }
        e if e.is_transient() || e.is_auth_expired() => {
            tracing::warn!(%provider, item, error = %err, "Activity left for retry")
        }
        _ => tracing::error!(%provider, item, error = %err, "Activity processing failed"),
    }
}

/// Turns provider evidence into workouts.
#[derive(Clone)]
pub struct ActivityPipeline {
    store: Arc<dyn TimelineStore>,
    gate: IdempotencyGate,
    classifier: Classifier,
    providers: ProviderService,
    notifier: Arc<dyn Notifier>,
    policy: EnginePolicy,
}

impl ActivityPipeline {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        ttl: Arc<dyn TtlStore>,
        providers: ProviderService,
        notifier: Arc<dyn Notifier>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            gate: IdempotencyGate::new(store.clone(), ttl, policy.clone()),
            classifier: Classifier::new(store.clone(), policy.clone()),
            store,
            providers,
            notifier,
            policy,
        }
    }

    pub fn providers(&self) -> &ProviderService {
        &self.providers
    }

    async fn resolve_user(&self, provider: Provider, external_user_id: &str) -> Result<User> {
        self.store
            .find_user_by_provider(provider, external_user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{} account {}", provider, external_user_id))
            })
    }

    // ─── Provider evidence ───────────────────────────────────────────────

    /// Run one normalized activity through gate, classifier and commit.
    pub async fn process_record(
        &self,
        user: &User,
        record: ActivityRecord,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        if now - record.start_time > self.policy.deadline() {
            return Err(AppError::Validation(format!(
                "{} {} started before the current deadline window",
                record.provider, record.external_id
            )));
        }
        if user.active_group_ids().is_empty() {
            return Err(AppError::NotFound(format!(
                "active membership for user {}",
                user.id
            )));
        }

        if let Admission::Dropped(reason) = self.gate.admit(&user.id, &record).await? {
            tracing::debug!(
                user_id = %user.id,
                provider = %record.provider,
                external_id = %record.external_id,
                ?reason,
                "Duplicate activity dropped"
            );
            return Ok(IngestOutcome::Duplicate(reason));
        }

        match self.apply(user, &record, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_transient() {
                    if let Err(release_err) = self.gate.release(&record).await {
                        tracing::warn!(error = %release_err, "Failed to release activity lock");
                    }
                }
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        user: &User,
        record: &ActivityRecord,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        match self.classifier.classify(user, record).await? {
            Classification::Merge(mut workouts) => {
                let strain = effective_strain(record);
                let count = workouts.len();
                for workout in &mut workouts {
                    workout.attach_record(record, strain);
                }
                self.store.put_workouts(&workouts).await?;
                tracing::info!(
                    user_id = %user.id,
                    provider = %record.provider,
                    external_id = %record.external_id,
                    workouts = count,
                    "Activity merged into manual upload"
                );
                Ok(IngestOutcome::Merged { workouts: count })
            }
            Classification::Drop(reason) => {
                tracing::debug!(
                    user_id = %user.id,
                    external_id = %record.external_id,
                    ?reason,
                    "Activity below provider minimums"
                );
                Ok(IngestOutcome::Filtered(reason))
            }
            Classification::NeedsConfirmation => {
                self.gate.park_pending(&user.id, record).await?;
                if let Err(e) = self.notifier.prompt_confirmation(&user.id, record).await {
                    tracing::warn!(user_id = %user.id, error = %e, "Failed to send confirmation prompt");
                }
                Ok(IngestOutcome::AwaitingConfirmation)
            }
            Classification::CommitPrimary => {
                let workouts = self.commit_record(user, record, now).await?;
                Ok(IngestOutcome::Committed {
                    workouts: workouts.len(),
                })
            }
        }
    }

    /// Create one workout per active group, with streaks, then rank and announce.
    ///
    /// The workouts are written in one atomic batch. A failed write leaves
    /// no group holding the activity, so the retry commits all of them.
    async fn commit_record(
        &self,
        user: &User,
        record: &ActivityRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<Workout>> {
        let strain = effective_strain(record);
        let day = local_date(record.start_time, self.policy.day_offset);

        let mut committed = Vec::new();
        for group_id in user.active_group_ids() {
            let previous = self.store.recent_workouts(&user.id, &group_id, 1).await?;
            let mut workout = Workout::from_record(&user.id, &group_id, record, strain);
            workout.streak = next_streak(previous.first(), day, self.policy.day_offset).value();
            committed.push(workout);
        }
        self.store.put_workouts(&committed).await?;

        tracing::info!(
            user_id = %user.id,
            provider = %record.provider,
            external_id = %record.external_id,
            groups = committed.len(),
            "Activity committed"
        );

        self.after_commit(&user.id, &committed, now).await;
        Ok(committed)
    }

    /// Rank recompute and announcements. Failures here never undo a commit.
    async fn after_commit(&self, user_id: &str, workouts: &[Workout], now: DateTime<Utc>) {
        let mut display_name = user_id.to_string();
        let mut promotion = None;

        // Only the rank fields are written, so a ban stored meanwhile stays.
        let mut change = RankChange::Unchanged;
        let mut apply = |user: &mut User| {
            change = rank::recompute(user, now);
            change != RankChange::Unchanged
        };
        match self.store.update_user(user_id, &mut apply).await {
            Ok(Some(user)) => {
                display_name = user.display_name;
                if let RankChange::Promoted { to, .. } = change {
                    promotion = Some(to);
                }
            }
            Ok(None) => tracing::info!(user_id, "User vanished before rank update"),
            Err(e) => tracing::warn!(user_id, error = %e, "Failed to store rank change"),
        }

        for workout in workouts {
            let message = describe_workout(&display_name, workout);
            if let Err(e) = self.notifier.announce(&workout.group_id, &message).await {
                tracing::warn!(group_id = %workout.group_id, error = %e, "Failed to announce workout");
            }
            if let Some(tier) = promotion {
                let message = format!(
                    "{} reached the rank of {}!",
                    display_name,
                    crate::models::rank::name_of(tier)
                );
                if let Err(e) = self.notifier.announce(&workout.group_id, &message).await {
                    tracing::warn!(group_id = %workout.group_id, error = %e, "Failed to announce promotion");
                }
            }
        }
    }

    /// Process a Garmin push or ping. Every entry is handled on its own, so
    /// one bad entry never blocks the rest.
    pub async fn ingest_garmin(&self, payload: GarminActivitiesPayload, now: DateTime<Utc>) -> IngestReport {
        let results: Vec<Vec<Result<IngestOutcome>>> = stream::iter(payload.activities)
            .map(|entry| self.ingest_garmin_entry(entry, now))
            .buffer_unordered(PROVIDER_CONCURRENCY)
            .collect()
            .await;

        let mut report = IngestReport::default();
        for result in results.iter().flatten() {
            report.tally(result);
        }
        tracing::info!(?report, "Garmin delivery processed");
        report
    }

    async fn ingest_garmin_entry(
        &self,
        entry: GarminActivityEntry,
        now: DateTime<Utc>,
    ) -> Vec<Result<IngestOutcome>> {
        let garmin_user = entry.summary.user_id.clone();
        let item = entry.summary.summary_id.clone();

        let user = match self.resolve_user(Provider::Garmin, &garmin_user).await {
            Ok(user) => user,
            Err(e) => {
                log_failure(Provider::Garmin, &item, &e);
                return vec![Err(e)];
            }
        };

        let summaries = match entry.callback_url {
            Some(url) => match self.providers.fetch_garmin_callback(&user.id, &url).await {
                Ok(summaries) => summaries,
                Err(e) => {
                    log_failure(Provider::Garmin, &item, &e);
                    return vec![Err(e)];
                }
            },
            None => vec![entry.summary],
        };

        let mut results = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let result = match normalize_garmin(&summary) {
                Ok(record) => self.process_record(&user, record, now).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                log_failure(Provider::Garmin, &summary.summary_id, e);
            }
            results.push(result);
        }
        results
    }

    /// Fetch and process the workout named by a Whoop webhook.
    pub async fn ingest_whoop_event(
        &self,
        event: &WhoopWebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let user = self
            .resolve_user(Provider::Whoop, &event.user_id.to_string())
            .await?;
        let workout = self.providers.whoop_workout(&user.id, event.id).await?;
        self.ingest_whoop_workout(&user, &workout, now).await
    }

    /// Process one Whoop workout (webhook or sync).
    pub async fn ingest_whoop_workout(
        &self,
        user: &User,
        workout: &WhoopWorkout,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        if workout
            .score_state
            .as_deref()
            .is_some_and(|state| state != WHOOP_SCORED)
        {
            return Err(AppError::TransientProvider(format!(
                "Whoop workout {} not scored yet",
                workout.id
            )));
        }

        let mut record = normalize_whoop(workout)?;
        if record.strain.is_none() {
            match self
                .providers
                .whoop_cycle_strain(&user.id, record.start_time)
                .await
            {
                Ok(strain) => record.strain = strain,
                Err(e) => {
                    tracing::warn!(user_id = %user.id, error = %e, "Cycle strain lookup failed, estimating")
                }
            }
        }
        self.process_record(user, record, now).await
    }

    /// Remove a provider link after deregistration or revoked permissions.
    pub async fn disconnect(&self, provider: Provider, external_user_id: &str) -> Result<bool> {
        let user = self.resolve_user(provider, external_user_id).await?;
        self.providers.disconnect(&user.id, provider, false).await
    }

    // ─── Manual evidence ─────────────────────────────────────────────────

    /// Record a photo upload. If a provider workout already covers this
    /// moment the photo is attached to it instead of creating a second row.
    pub async fn manual_upload(
        &self,
        user_id: &str,
        group_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ManualOutcome> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;
        if !user.membership(group_id).is_some_and(|m| m.is_active()) {
            return Err(AppError::NotFound(format!(
                "active membership of {} in {}",
                user_id, group_id
            )));
        }

        let margin = self.policy.merge_margin;
        let candidates = self
            .store
            .workouts_between(
                user_id,
                group_id,
                now - margin - Duration::hours(MAX_ACTIVITY_SPAN_HOURS),
                now + margin,
            )
            .await?;

        let covering = candidates.into_iter().find(|w| {
            w.provider.is_some()
                && !w.photo_attached
                && w.created_at + Duration::seconds(i64::from(w.duration_seconds)) + margin >= now
        });
        if let Some(mut workout) = covering {
            workout.photo_attached = true;
            self.store.put_workout(&workout).await?;
            tracing::info!(user_id, group_id, workout_id = %workout.id, "Photo attached to provider workout");
            return Ok(ManualOutcome::Attached {
                workout_id: workout.id,
            });
        }

        let previous = self.store.recent_workouts(user_id, group_id, 1).await?;
        let mut workout = Workout::manual(user_id, group_id, now);
        workout.streak = next_streak(
            previous.first(),
            local_date(now, self.policy.day_offset),
            self.policy.day_offset,
        )
        .value();
        self.store.put_workout(&workout).await?;
        tracing::info!(user_id, group_id, workout_id = %workout.id, "Manual workout committed");

        self.after_commit(user_id, std::slice::from_ref(&workout), now)
            .await;
        Ok(ManualOutcome::Committed(workout))
    }

    /// Apply the user's answer to a confirmation prompt.
    pub async fn resolve_confirmation(
        &self,
        user_id: &str,
        provider: Provider,
        external_id: &str,
        accepted: bool,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationOutcome> {
        let external_id = normalize_external_id(external_id);

        let pending = self
            .gate
            .peek_pending(provider, &external_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pending {} {}", provider, external_id)))?;
        if pending.user_id != user_id {
            return Err(AppError::NotFound(format!(
                "pending {} {}",
                provider, external_id
            )));
        }

        let Some(pending) = self.gate.take_pending(provider, &external_id).await? else {
            return Ok(ConfirmationOutcome::AlreadyResolved);
        };

        if !accepted {
            self.gate.mark_ignored(provider, &external_id).await?;
            tracing::info!(user_id, %provider, external_id, "Activity declined");
            return Ok(ConfirmationOutcome::Declined);
        }

        if self
            .store
            .has_workout_with_external_id(user_id, provider, &external_id)
            .await?
        {
            return Ok(ConfirmationOutcome::AlreadyResolved);
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        match self.commit_record(&user, &pending.record, now).await {
            Ok(workouts) => Ok(ConfirmationOutcome::Committed {
                workouts: workouts.len(),
            }),
            Err(e) => {
                if e.is_transient() {
                    // put it back so the user can answer again
                    if let Err(park_err) = self.gate.park_pending(user_id, &pending.record).await {
                        tracing::warn!(error = %park_err, "Failed to re-park activity");
                    }
                }
                Err(e)
            }
        }
    }
}

fn describe_workout(name: &str, workout: &Workout) -> String {
    let mut message = if workout.provider.is_some() {
        format!(
            "{} logged {} ({} min)",
            name,
            workout.sport_name,
            workout.duration_seconds / 60
        )
    } else {
        format!("{} checked in with a photo", name)
    };
    if let Some(streak) = workout.streak.filter(|s| *s > 1) {
        message.push_str(&format!(", {} day streak", streak));
    }
    message
}
