// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic Whoop sync.
//!
//! Whoop webhooks are best-effort, so every linked account is also polled
//! for workouts inside the current deadline window. Everything goes
//! through the same pipeline, and therefore the same gate, as webhooks.

use crate::db::TimelineStore;
use crate::error::AppError;
use crate::models::{Provider, User};
use crate::services::ingest::{log_failure, ActivityPipeline, IngestReport};
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Users synced concurrently.
const SYNC_CONCURRENCY: usize = 4;

/// Poll every Whoop-linked user once.
pub async fn sync_whoop(
    pipeline: &ActivityPipeline,
    store: &dyn TimelineStore,
    deadline: Duration,
    now: DateTime<Utc>,
) -> Result<IngestReport, AppError> {
    let users: Vec<User> = store
        .list_users()
        .await?
        .into_iter()
        .filter(|u| u.link(Provider::Whoop).is_some())
        .collect();

    let since = now - deadline;
    let per_user: Vec<IngestReport> = stream::iter(users)
        .map(|user| async move { sync_user(pipeline, &user, since, now).await })
        .buffer_unordered(SYNC_CONCURRENCY)
        .collect()
        .await;

    let mut report = IngestReport::default();
    for r in per_user {
        report.received += r.received;
        report.committed += r.committed;
        report.merged += r.merged;
        report.parked += r.parked;
        report.duplicates += r.duplicates;
        report.filtered += r.filtered;
        report.failed += r.failed;
    }
    Ok(report)
}

async fn sync_user(
    pipeline: &ActivityPipeline,
    user: &User,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> IngestReport {
    let mut report = IngestReport::default();

    let mut workouts = match pipeline.providers().whoop_workouts_since(&user.id, since).await {
        Ok(workouts) => workouts,
        Err(e) => {
            log_failure(Provider::Whoop, &user.id, &e);
            report.failed += 1;
            return report;
        }
    };

    // Oldest first so streaks chain. Whoop timestamps are all UTC `Z`.
    workouts.sort_by(|a, b| a.start.cmp(&b.start));

    for workout in &workouts {
        let result = pipeline.ingest_whoop_workout(user, workout, now).await;
        if let Err(e) = &result {
            log_failure(Provider::Whoop, &workout.id.to_string(), e);
        }
        report.tally(&result);
    }
    report
}

/// Run `sync_whoop` on a fixed interval until shutdown is signalled.
pub async fn run_sync_loop(
    pipeline: ActivityPipeline,
    store: Arc<dyn TimelineStore>,
    deadline: Duration,
    every: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "Whoop sync loop started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Whoop sync loop shutting down");
                    break;
                }
            }
            _ = ticker.tick() => {
                match sync_whoop(&pipeline, store.as_ref(), deadline, Utc::now()).await {
                    Ok(report) => tracing::info!(?report, "Whoop sync finished"),
                    Err(e) => tracing::warn!(error = %e, "Whoop sync failed"),
                }
            }
        }
    }
}
