// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Timeline store: the durable record of users, groups, workouts and events.
//!
//! The engine only depends on the [`TimelineStore`] contract. `FirestoreDb`
//! is the production backend; `MemoryStore` backs tests and local runs.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{Event, EventKind, Group, Provider, User, Workout};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const GROUPS: &str = "groups";
    pub const WORKOUTS: &str = "workouts";
    pub const EVENTS: &str = "events";
}

/// Read/write contract of the timeline store.
///
/// Workout queries never return cancelled workouts, and results are ordered
/// newest first unless stated otherwise.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    // ─── Users ───────────────────────────────────────────────────
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError>;

    async fn upsert_user(&self, user: &User) -> Result<(), AppError>;

    /// Read-modify-write of one user against its latest stored state.
    ///
    /// `apply` returns whether it changed anything; nothing is written
    /// otherwise. Returns the user as stored afterwards, or `None` if the
    /// user does not exist.
    async fn update_user(
        &self,
        user_id: &str,
        apply: &mut (dyn for<'u> FnMut(&'u mut User) -> bool + Send),
    ) -> Result<Option<User>, AppError>;

    /// Resolve the user owning a provider account.
    async fn find_user_by_provider(
        &self,
        provider: Provider,
        external_user_id: &str,
    ) -> Result<Option<User>, AppError>;

    async fn list_users(&self) -> Result<Vec<User>, AppError>;

    // ─── Groups ──────────────────────────────────────────────────
    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError>;

    async fn upsert_group(&self, group: &Group) -> Result<(), AppError>;

    // ─── Workouts ────────────────────────────────────────────────
    async fn get_workout(&self, workout_id: &str) -> Result<Option<Workout>, AppError>;

    /// Create or overwrite a workout (keyed by `workout.id`).
    async fn put_workout(&self, workout: &Workout) -> Result<(), AppError>;

    /// Write several workouts atomically: all of them or none.
    async fn put_workouts(&self, workouts: &[Workout]) -> Result<(), AppError>;

    async fn delete_workout(&self, workout_id: &str) -> Result<(), AppError>;

    /// Whether any workout of `user_id` already carries this provider id.
    async fn has_workout_with_external_id(
        &self,
        user_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> Result<bool, AppError>;

    /// The `limit` most recent workouts of a user in a group.
    async fn recent_workouts(
        &self,
        user_id: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Workout>, AppError>;

    /// Workouts of a user in a group with `from <= created_at <= to`.
    async fn workouts_between(
        &self,
        user_id: &str,
        group_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError>;

    /// All workouts in a group created at or after `since`.
    async fn group_workouts_since(
        &self,
        group_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError>;

    // ─── Events ──────────────────────────────────────────────────
    async fn append_event(&self, event: &Event) -> Result<(), AppError>;

    /// Whether an event of `kind` exists for the group (and user, if given)
    /// at or after `since`.
    async fn has_event_since(
        &self,
        group_id: &str,
        user_id: Option<&str>,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Whether a user already has an event of `kind` tied to the deadline
    /// cycle starting at `cycle`.
    async fn has_cycle_event(
        &self,
        group_id: &str,
        user_id: &str,
        kind: EventKind,
        cycle: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}
