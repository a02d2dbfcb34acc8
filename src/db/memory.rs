// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process timeline store for tests and single-node local runs.

use crate::db::TimelineStore;
use crate::error::AppError;
use crate::models::{Event, EventKind, Group, Provider, User, Workout};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    groups: DashMap<String, Group>,
    workouts: DashMap<String, Workout>,
    events: RwLock<Vec<Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_workouts<F>(&self, filter: F) -> Vec<Workout>
    where
        F: Fn(&Workout) -> bool,
    {
        let mut found: Vec<Workout> = self
            .workouts
            .iter()
            .filter(|w| !w.cancelled && filter(w.value()))
            .map(|w| w.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    /// Number of stored events (test helper).
    pub async fn event_count(&self, kind: EventKind) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(
        &self,
        user_id: &str,
        apply: &mut (dyn for<'u> FnMut(&'u mut User) -> bool + Send),
    ) -> Result<Option<User>, AppError> {
        // The entry guard serializes writers of the same user.
        Ok(self.users.get_mut(user_id).map(|mut entry| {
            let mut user = entry.value().clone();
            if apply(&mut user) {
                *entry.value_mut() = user.clone();
            }
            user
        }))
    }

    async fn find_user_by_provider(
        &self,
        provider: Provider,
        external_user_id: &str,
    ) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .iter()
            .find(|u| {
                u.link(provider)
                    .is_some_and(|l| l.external_user_id == external_user_id)
            })
            .map(|u| u.value().clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError> {
        Ok(self.groups.get(group_id).map(|g| g.value().clone()))
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), AppError> {
        self.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get_workout(&self, workout_id: &str) -> Result<Option<Workout>, AppError> {
        Ok(self.workouts.get(workout_id).map(|w| w.value().clone()))
    }

    async fn put_workout(&self, workout: &Workout) -> Result<(), AppError> {
        self.workouts.insert(workout.id.clone(), workout.clone());
        Ok(())
    }

    async fn put_workouts(&self, workouts: &[Workout]) -> Result<(), AppError> {
        for workout in workouts {
            self.workouts.insert(workout.id.clone(), workout.clone());
        }
        Ok(())
    }

    async fn delete_workout(&self, workout_id: &str) -> Result<(), AppError> {
        self.workouts.remove(workout_id);
        Ok(())
    }

    async fn has_workout_with_external_id(
        &self,
        user_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> Result<bool, AppError> {
        Ok(self.workouts.iter().any(|w| {
            w.user_id == user_id
                && w.provider == Some(provider)
                && w.external_id.as_deref() == Some(external_id)
        }))
    }

    async fn recent_workouts(
        &self,
        user_id: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Workout>, AppError> {
        let mut found = self.collect_workouts(|w| w.user_id == user_id && w.group_id == group_id);
        found.truncate(limit);
        Ok(found)
    }

    async fn workouts_between(
        &self,
        user_id: &str,
        group_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        Ok(self.collect_workouts(|w| {
            w.user_id == user_id && w.group_id == group_id && w.created_at >= from && w.created_at <= to
        }))
    }

    async fn group_workouts_since(
        &self,
        group_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        Ok(self.collect_workouts(|w| w.group_id == group_id && w.created_at >= since))
    }

    async fn append_event(&self, event: &Event) -> Result<(), AppError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn has_event_since(
        &self,
        group_id: &str,
        user_id: Option<&str>,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self.events.read().await.iter().any(|e| {
            e.group_id == group_id
                && e.kind == kind
                && e.at >= since
                && user_id.map_or(true, |u| e.user_id == u)
        }))
    }

    async fn has_cycle_event(
        &self,
        group_id: &str,
        user_id: &str,
        kind: EventKind,
        cycle: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self.events.read().await.iter().any(|e| {
            e.group_id == group_id && e.user_id == user_id && e.kind == kind && e.cycle == Some(cycle)
        }))
    }
}
