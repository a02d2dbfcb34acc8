// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing the timeline store.
//!
//! Provides typed operations for:
//! - Users (profile, rank, provider links, memberships)
//! - Provider links (index collection for webhook owner lookup)
//! - Groups
//! - Workouts
//! - Events (append-only audit log)

use crate::db::{collections, TimelineStore};
use crate::error::AppError;
use crate::models::{Event, EventKind, Group, Provider, User, Workout};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};

const MAX_CONCURRENT_DB_OPS: usize = 50;

/// Index collection mapping a provider account to its owner.
const PROVIDER_LINKS: &str = "provider_links";

/// Document in `provider_links/{provider}_{external_user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProviderLinkIndex {
    provider: Provider,
    external_user_id: String,
    user_id: String,
}

fn link_doc_id(provider: Provider, external_user_id: &str) -> String {
    format!("{}_{}", provider, urlencoding::encode(external_user_id))
}

fn event_kind_str(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Ban => "ban",
        EventKind::LastDayNotice => "last_day_notice",
        EventKind::WeeklyLeader => "weekly_leader",
    }
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Rewrite the provider-link index so it matches `user.provider_links`.
    async fn sync_link_index(&self, user: &User, previous: Option<&User>) -> Result<(), AppError> {
        let client = self.get_client()?;

        let stale: Vec<String> = previous
            .map(|p| {
                p.provider_links
                    .iter()
                    .filter(|old| {
                        !user.provider_links.iter().any(|l| {
                            l.provider == old.provider && l.external_user_id == old.external_user_id
                        })
                    })
                    .map(|old| link_doc_id(old.provider, &old.external_user_id))
                    .collect()
            })
            .unwrap_or_default();

        for doc_id in stale {
            client
                .fluent()
                .delete()
                .from(PROVIDER_LINKS)
                .document_id(&doc_id)
                .execute()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        let entries: Vec<ProviderLinkIndex> = user
            .provider_links
            .iter()
            .map(|l| ProviderLinkIndex {
                provider: l.provider,
                external_user_id: l.external_user_id.clone(),
                user_id: user.id.clone(),
            })
            .collect();

        stream::iter(entries)
            .map(|entry| async move {
                let doc_id = link_doc_id(entry.provider, &entry.external_user_id);
                let _: () = client
                    .fluent()
                    .update()
                    .in_col(PROVIDER_LINKS)
                    .document_id(&doc_id)
                    .object(&entry)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok::<_, AppError>(())
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        Ok(())
    }
}

#[async_trait]
impl TimelineStore for FirestoreDb {
    // ─── User Operations ─────────────────────────────────────────

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let previous = self.get_user(&user.id).await?;

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.sync_link_index(user, previous.as_ref()).await
    }

    async fn update_user(
        &self,
        user_id: &str,
        apply: &mut (dyn for<'u> FnMut(&'u mut User) -> bool + Send),
    ) -> Result<Option<User>, AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Read the current document so concurrent writers are not clobbered.
        let Some(previous) = self.get_user(user_id).await? else {
            let _ = transaction.rollback().await;
            return Ok(None);
        };

        let mut user = previous.clone();
        if !apply(&mut user) {
            let _ = transaction.rollback().await;
            return Ok(Some(user));
        }

        client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(&user)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Failed to add user to transaction: {}", e)))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        self.sync_link_index(&user, Some(&previous)).await?;
        Ok(Some(user))
    }

    async fn find_user_by_provider(
        &self,
        provider: Provider,
        external_user_id: &str,
    ) -> Result<Option<User>, AppError> {
        let index: Option<ProviderLinkIndex> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(PROVIDER_LINKS)
            .obj()
            .one(&link_doc_id(provider, external_user_id))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let Some(index) = index else {
            return Ok(None);
        };

        // The index may lag behind an unlink; the user document is authoritative.
        let user = self.get_user(&index.user_id).await?;
        Ok(user.filter(|u| {
            u.link(provider)
                .is_some_and(|l| l.external_user_id == external_user_id)
        }))
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Group Operations ────────────────────────────────────────

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::GROUPS)
            .obj()
            .one(group_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_group(&self, group: &Group) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::GROUPS)
            .document_id(&group.id)
            .object(group)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Workout Operations ──────────────────────────────────────

    async fn get_workout(&self, workout_id: &str) -> Result<Option<Workout>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::WORKOUTS)
            .obj()
            .one(workout_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_workout(&self, workout: &Workout) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::WORKOUTS)
            .document_id(&workout.id)
            .object(workout)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn put_workouts(&self, workouts: &[Workout]) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        for workout in workouts {
            client
                .fluent()
                .update()
                .in_col(collections::WORKOUTS)
                .document_id(&workout.id)
                .object(workout)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add workout to transaction: {}", e))
                })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        Ok(())
    }

    async fn delete_workout(&self, workout_id: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::WORKOUTS)
            .document_id(workout_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn has_workout_with_external_id(
        &self,
        user_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> Result<bool, AppError> {
        let found: Vec<Workout> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::WORKOUTS)
            .filter(|q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("provider").eq(provider.as_str()),
                    q.field("external_id").eq(external_id),
                ])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(!found.is_empty())
    }

    async fn recent_workouts(
        &self,
        user_id: &str,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Workout>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::WORKOUTS)
            .filter(|q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("group_id").eq(group_id),
                    q.field("cancelled").eq(false),
                ])
            })
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .limit(limit as u32)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn workouts_between(
        &self,
        user_id: &str,
        group_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        let from = format_utc_rfc3339(from);
        let to = format_utc_rfc3339(to);

        self.get_client()?
            .fluent()
            .select()
            .from(collections::WORKOUTS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id),
                    q.field("group_id").eq(group_id),
                    q.field("cancelled").eq(false),
                    q.field("created_at").greater_than_or_equal(from.clone()),
                    q.field("created_at").less_than_or_equal(to.clone()),
                ])
            })
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn group_workouts_since(
        &self,
        group_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Workout>, AppError> {
        let since = format_utc_rfc3339(since);

        self.get_client()?
            .fluent()
            .select()
            .from(collections::WORKOUTS)
            .filter(move |q| {
                q.for_all([
                    q.field("group_id").eq(group_id),
                    q.field("cancelled").eq(false),
                    q.field("created_at").greater_than_or_equal(since.clone()),
                ])
            })
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Event Operations ────────────────────────────────────────

    async fn append_event(&self, event: &Event) -> Result<(), AppError> {
        let doc_id = uuid::Uuid::new_v4().to_string();
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::EVENTS)
            .document_id(&doc_id)
            .object(event)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn has_event_since(
        &self,
        group_id: &str,
        user_id: Option<&str>,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let since = format_utc_rfc3339(since);
        let kind = event_kind_str(kind);

        let found: Vec<Event> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::EVENTS)
            .filter(move |q| {
                q.for_all([
                    q.field("group_id").eq(group_id),
                    q.field("kind").eq(kind),
                    q.field("at").greater_than_or_equal(since.clone()),
                    user_id.and_then(|u| q.field("user_id").eq(u)),
                ])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(!found.is_empty())
    }

    async fn has_cycle_event(
        &self,
        group_id: &str,
        user_id: &str,
        kind: EventKind,
        cycle: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let cycle = format_utc_rfc3339(cycle);
        let kind = event_kind_str(kind);

        let found: Vec<Event> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::EVENTS)
            .filter(move |q| {
                q.for_all([
                    q.field("group_id").eq(group_id),
                    q.field("user_id").eq(user_id),
                    q.field("kind").eq(kind),
                    q.field("cycle").eq(cycle.clone()),
                ])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(!found.is_empty())
    }
}
