// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use streakguard::config::Config;
use streakguard::db::{FirestoreDb, MemoryStore, TimelineStore};
use streakguard::error::AppError;
use streakguard::middleware::auth::{create_jwt, Role};
use streakguard::models::{
    ActivityRecord, Event, EventKind, Group, Membership, Provider, ProviderLink, User, Workout,
};
use streakguard::routes::create_router;
use streakguard::services::providers::garmin::GarminActivitySummary;
use streakguard::services::providers::whoop::WhoopWorkout;
use streakguard::services::providers::{ProviderApi, TokenRefreshResponse};
use streakguard::services::{MemoryTtlStore, Notifier};
use streakguard::AppState;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Unique suffix for test isolation against a shared emulator.
#[allow(dead_code)]
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

// ─── Recording notifier ──────────────────────────────────────────

/// Notifier that records every call for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub announcements: Mutex<Vec<(String, String)>>,
    pub direct: Mutex<Vec<(String, String)>>,
    pub prompts: Mutex<Vec<(String, String)>>,
    pub removals: Mutex<Vec<(String, String)>>,
    /// When set, `remove_member` fails like a chat platform outage.
    pub fail_removals: AtomicBool,
    /// When set, `remove_member` takes a while to answer.
    pub slow_removals: AtomicBool,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn announcements(&self) -> Vec<(String, String)> {
        self.announcements.lock().unwrap().clone()
    }

    pub fn direct(&self) -> Vec<(String, String)> {
        self.direct.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<(String, String)> {
        self.removals.lock().unwrap().clone()
    }

    pub fn announced_containing(&self, needle: &str) -> usize {
        self.announcements()
            .iter()
            .filter(|(_, m)| m.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn announce(&self, group_id: &str, message: &str) -> Result<(), AppError> {
        self.announcements
            .lock()
            .unwrap()
            .push((group_id.to_string(), message.to_string()));
        Ok(())
    }

    async fn notify_user(&self, user_id: &str, message: &str) -> Result<(), AppError> {
        self.direct
            .lock()
            .unwrap()
            .push((user_id.to_string(), message.to_string()));
        Ok(())
    }

    async fn prompt_confirmation(&self, user_id: &str, record: &ActivityRecord) -> Result<(), AppError> {
        self.prompts
            .lock()
            .unwrap()
            .push((user_id.to_string(), record.external_id.clone()));
        Ok(())
    }

    async fn remove_member(&self, user_id: &str, group_id: &str) -> Result<(), AppError> {
        if self.slow_removals.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        }
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(AppError::TransientProvider("chat platform unavailable".to_string()));
        }
        self.removals
            .lock()
            .unwrap()
            .push((user_id.to_string(), group_id.to_string()));
        Ok(())
    }
}

// ─── Fake provider API ───────────────────────────────────────────

/// Canned provider responses.
#[derive(Default)]
pub struct FakeProviderApi {
    /// Summaries returned for a Garmin callback URL
    pub garmin_callbacks: Mutex<HashMap<String, Vec<GarminActivitySummary>>>,
    pub whoop_workouts: Mutex<HashMap<i64, WhoopWorkout>>,
    pub cycle_strain: Mutex<Option<f64>>,
    /// When set, token refresh is rejected like a revoked grant.
    pub reject_refresh: AtomicBool,
    pub refresh_calls: AtomicUsize,
    pub callback_calls: AtomicUsize,
}

#[async_trait]
impl ProviderApi for FakeProviderApi {
    async fn refresh_token(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(AppError::AuthExpired(format!("{} refresh rejected", provider)));
        }
        Ok(TokenRefreshResponse {
            access_token: format!("fresh-{}", refresh_token),
            refresh_token: refresh_token.to_string(),
            expires_at: (Utc::now() + Duration::hours(6)).timestamp(),
        })
    }

    async fn garmin_callback(
        &self,
        _access_token: &str,
        callback_url: &str,
    ) -> Result<Vec<GarminActivitySummary>, AppError> {
        self.callback_calls.fetch_add(1, Ordering::SeqCst);
        self.garmin_callbacks
            .lock()
            .unwrap()
            .get(callback_url)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Garmin callback".to_string()))
    }

    async fn whoop_workout(&self, _access_token: &str, workout_id: i64) -> Result<WhoopWorkout, AppError> {
        self.whoop_workouts
            .lock()
            .unwrap()
            .get(&workout_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Whoop workout {}", workout_id)))
    }

    async fn whoop_workouts_since(
        &self,
        _access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WhoopWorkout>, AppError> {
        Ok(self
            .whoop_workouts
            .lock()
            .unwrap()
            .values()
            .filter(|w| {
                w.start
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .is_some_and(|start| start.with_timezone(&Utc) >= since)
            })
            .cloned()
            .collect())
    }

    async fn whoop_cycle_strain(
        &self,
        _access_token: &str,
        _at: DateTime<Utc>,
    ) -> Result<Option<f64>, AppError> {
        Ok(*self.cycle_strain.lock().unwrap())
    }
}

// ─── Faulty store ────────────────────────────────────────────────

/// Store that delegates to a `MemoryStore` but can be told to fail writes.
#[allow(dead_code)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    /// Fail the next batch write touching this group, then clear.
    pub fail_batch_for_group: Mutex<Option<String>>,
    /// Fail every `append_event` of this kind.
    pub fail_events: Mutex<Option<EventKind>>,
    /// Returned once by `list_users` instead of the live users, like a
    /// listing read just before concurrent writes.
    pub stale_listing: Mutex<Option<Vec<User>>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_batch_for_group: Mutex::new(None),
            fail_events: Mutex::new(None),
            stale_listing: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TimelineStore for FlakyStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.inner.get_user(user_id).await
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        self.inner.upsert_user(user).await
    }

    async fn update_user(
        &self,
        user_id: &str,
        apply: &mut (dyn for<'u> FnMut(&'u mut User) -> bool + Send),
    ) -> Result<Option<User>, AppError> {
        self.inner.update_user(user_id, apply).await
    }

    async fn find_user_by_provider(
        &self,
        provider: Provider,
        external_user_id: &str,
    ) -> Result<Option<User>, AppError> {
        self.inner.find_user_by_provider(provider, external_user_id).await
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        if let Some(users) = self.stale_listing.lock().unwrap().take() {
            return Ok(users);
        }
        self.inner.list_users().await
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError> {
        self.inner.get_group(group_id).await
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), AppError> {
        self.inner.upsert_group(group).await
    }

    async fn get_workout(&self, workout_id: &str) -> Result<Option<Workout>, AppError> {
        self.inner.get_workout(workout_id).await
    }

    async fn put_workout(&self, workout: &Workout) -> Result<(), AppError> {
        self.inner.put_workout(workout).await
    }

    async fn put_workouts(&self, workouts: &[Workout]) -> Result<(), AppError> {
        {
            let mut failing = self.fail_batch_for_group.lock().unwrap();
            let hit = failing
                .as_deref()
                .is_some_and(|g| workouts.iter().any(|w| w.group_id == g));
            if hit {
                *failing = None;
                return Err(AppError::Database("write timeout".to_string()));
            }
        }
        self.inner.put_workouts(workouts).await
    }

    async fn delete_workout(&self, workout_id: &str) -> Result<(), AppError> {
        self.inner.delete_workout(workout_id).await
    }

    async fn has_workout_with_external_id(
        &self,
        user_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> Result<bool, AppError> {
        self.inner
            .has_workout_with_external_id(user_id, provider, external_id)
            .await
    }

    async fn recent_workouts(
        &self,
        user_id: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Workout>, AppError> {
        self.inner.recent_workouts(user_id, group_id, limit).await
    }

    async fn workouts_between(
        &self,
        user_id: &str,
        group_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        self.inner.workouts_between(user_id, group_id, from, to).await
    }

    async fn group_workouts_since(
        &self,
        group_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        self.inner.group_workouts_since(group_id, since).await
    }

    async fn append_event(&self, event: &Event) -> Result<(), AppError> {
        if *self.fail_events.lock().unwrap() == Some(event.kind) {
            return Err(AppError::Database("event write rejected".to_string()));
        }
        self.inner.append_event(event).await
    }

    async fn has_event_since(
        &self,
        group_id: &str,
        user_id: Option<&str>,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner.has_event_since(group_id, user_id, kind, since).await
    }

    async fn has_cycle_event(
        &self,
        group_id: &str,
        user_id: &str,
        kind: EventKind,
        cycle: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner.has_cycle_event(group_id, user_id, kind, cycle).await
    }
}

// ─── App wiring ──────────────────────────────────────────────────

/// Engine wired to in-memory collaborators.
///
/// `store` is the backing memory store; the engine reaches it through
/// `faults`, which passes everything through until told otherwise.
#[allow(dead_code)]
pub struct TestHarness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub faults: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub api: Arc<FakeProviderApi>,
}

#[allow(dead_code)]
impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::test_default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FlakyStore::new(store.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let api = Arc::new(FakeProviderApi::default());
        let state = Arc::new(AppState::new(
            config,
            faults.clone(),
            Arc::new(MemoryTtlStore::new()),
            api.clone(),
            notifier.clone(),
        ));
        Self {
            state,
            store,
            faults,
            notifier,
            api,
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    pub fn token(&self, role: Role) -> String {
        create_jwt("test-caller", role, &self.state.config.jwt_signing_key)
            .expect("Failed to create JWT")
    }

    pub async fn add_group(&self, group_id: &str) {
        self.store
            .upsert_group(&Group {
                id: group_id.to_string(),
                chat_ref: format!("chat-{}", group_id),
                approved: true,
            })
            .await
            .unwrap();
    }

    /// Store a user who joined `group_id` at `joined_at`, linked to Garmin
    /// as `garmin-<id>` and to Whoop as the numeric `whoop_id`.
    pub async fn add_member(&self, user_id: &str, group_id: &str, joined_at: DateTime<Utc>) -> User {
        let user = User {
            id: user_id.to_string(),
            display_name: format!("Member {}", user_id),
            rank_tier: 0,
            rank_changed_at: None,
            provider_links: vec![
                link(Provider::Garmin, &format!("garmin-{}", user_id)),
                link(Provider::Whoop, &whoop_id(user_id).to_string()),
            ],
            memberships: vec![Membership::new(group_id, joined_at)],
        };
        self.store.upsert_user(&user).await.unwrap();
        user
    }

    pub async fn user(&self, user_id: &str) -> User {
        self.store.get_user(user_id).await.unwrap().expect("user exists")
    }

    /// Store a committed manual workout at `at`.
    pub async fn add_workout(&self, user_id: &str, group_id: &str, at: DateTime<Utc>) -> Workout {
        let workout = Workout::manual(user_id, group_id, at);
        self.store.put_workout(&workout).await.unwrap();
        workout
    }

    pub async fn workouts(&self, user_id: &str, group_id: &str) -> Vec<Workout> {
        self.store.recent_workouts(user_id, group_id, 100).await.unwrap()
    }
}

/// Whoop user ids are numeric; derive a stable one from the user id.
#[allow(dead_code)]
pub fn whoop_id(user_id: &str) -> i64 {
    user_id.bytes().fold(7i64, |acc, b| acc * 31 + i64::from(b)) % 1_000_000
}

fn link(provider: Provider, external_user_id: &str) -> ProviderLink {
    ProviderLink {
        provider,
        external_user_id: external_user_id.to_string(),
        access_token: format!("{}-access", provider),
        refresh_token: format!("{}-refresh", provider),
        expires_at: Utc::now() + Duration::days(30),
    }
}

/// Garmin summary for `garmin-<user_id>` starting at `start`.
#[allow(dead_code)]
pub fn garmin_summary(
    user_id: &str,
    summary_id: &str,
    start: DateTime<Utc>,
    minutes: u32,
) -> GarminActivitySummary {
    GarminActivitySummary {
        user_id: format!("garmin-{}", user_id),
        summary_id: summary_id.to_string(),
        activity_type: Some("RUNNING".to_string()),
        start_time_in_seconds: Some(start.timestamp()),
        duration_in_seconds: Some(minutes * 60),
        average_heart_rate_in_beats_per_minute: Some(145.0),
        active_kilocalories: Some(400.0),
        distance_in_meters: Some(6000.0),
        device_name: Some("Forerunner 265".to_string()),
    }
}

/// Provider-independent record, for driving the pipeline directly.
#[allow(dead_code)]
pub fn record(provider: Provider, external_id: &str, start: DateTime<Utc>, minutes: u32) -> ActivityRecord {
    ActivityRecord {
        provider,
        external_id: external_id.to_string(),
        start_time: start,
        duration_seconds: minutes * 60,
        calories: 350.0,
        avg_hr: 140.0,
        distance_meters: 5000.0,
        sport_name: "running".to_string(),
        device_name: None,
        strain: Some(12.0),
    }
}
