// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Routes called by the chat bridge (bot token required).

use crate::error::{AppError, Result};
use crate::middleware::auth::ServicePrincipal;
use crate::models::{Membership, MembershipStatus, Provider, ProviderLink, User};
use crate::services::ingest::{ConfirmationOutcome, ManualOutcome};
use crate::AppState;
use axum::{extract::State, routing::post, Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Internal routes. The auth middleware is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/internal/members", post(join_group))
        .route("/internal/links", post(link_provider))
        .route("/internal/manual", post(manual_upload))
        .route("/internal/confirmations", post(confirm))
}

fn validated<T: Validate>(body: T) -> Result<T> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(body)
}

// ─── Membership ──────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    #[validate(length(min = 1, max = 128))]
    pub group_id: String,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub user_id: String,
    pub group_id: String,
    pub status: MembershipStatus,
}

/// Register a member of an approved group.
async fn join_group(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JoinRequest>,
) -> Result<Json<JoinResponse>> {
    let body = validated(body)?;

    let group = state
        .store
        .get_group(&body.group_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {}", body.group_id)))?;
    if !group.approved {
        return Err(AppError::BadRequest(format!(
            "Group {} is not approved",
            group.id
        )));
    }

    let now = Utc::now();
    let mut status = MembershipStatus::Active;
    let mut apply = |user: &mut User| {
        user.display_name = body.display_name.clone();
        match user.membership(&body.group_id) {
            // Banned members come back through the admin rejoin action.
            Some(existing) => status = existing.status,
            None => user.memberships.push(Membership::new(&body.group_id, now)),
        }
        true
    };
    let existing = state.store.update_user(&body.user_id, &mut apply).await?;
    let user = match existing {
        Some(user) => user,
        None => {
            let user = User {
                id: body.user_id.clone(),
                display_name: body.display_name.clone(),
                rank_tier: 0,
                rank_changed_at: None,
                provider_links: Vec::new(),
                memberships: vec![Membership::new(&body.group_id, now)],
            };
            state.store.upsert_user(&user).await?;
            user
        }
    };

    tracing::info!(user_id = %user.id, group_id = %body.group_id, ?status, "Member registered");
    Ok(Json(JoinResponse {
        user_id: user.id,
        group_id: body.group_id,
        status,
    }))
}

// ─── Provider links ──────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct LinkRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub provider: Provider,
    #[validate(length(min = 1, max = 128))]
    pub external_user_id: String,
    #[validate(length(min = 1))]
    pub access_token: String,
    #[validate(length(min = 1))]
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Store tokens obtained by the bridge's OAuth flow.
async fn link_provider(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkRequest>,
) -> Result<Json<serde_json::Value>> {
    let body = validated(body)?;

    if let Some(owner) = state
        .store
        .find_user_by_provider(body.provider, &body.external_user_id)
        .await?
    {
        if owner.id != body.user_id {
            return Err(AppError::BadRequest(format!(
                "{} account already linked to another user",
                body.provider
            )));
        }
    }

    let link = ProviderLink {
        provider: body.provider,
        external_user_id: body.external_user_id,
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_at: body.expires_at,
    };
    let mut apply = |user: &mut User| {
        user.unlink(link.provider);
        user.provider_links.push(link.clone());
        true
    };
    let user = state
        .store
        .update_user(&body.user_id, &mut apply)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", body.user_id)))?;

    tracing::info!(user_id = %user.id, provider = %body.provider, "Provider account linked");
    Ok(Json(serde_json::json!({ "linked": true })))
}

// ─── Manual uploads ──────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct ManualRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 128))]
    pub group_id: String,
    /// Opaque reference to the uploaded photo, for logs
    #[validate(length(max = 512))]
    pub photo_ref: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ManualResponse {
    /// "attached" or "committed"
    pub result: &'static str,
    pub workout_id: String,
    pub streak: Option<u32>,
}

async fn manual_upload(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<ServicePrincipal>,
    Json(body): Json<ManualRequest>,
) -> Result<Json<ManualResponse>> {
    let body = validated(body)?;
    tracing::debug!(caller = %caller.subject, photo_ref = ?body.photo_ref, "Manual upload");

    let response = match state
        .pipeline
        .manual_upload(&body.user_id, &body.group_id, Utc::now())
        .await?
    {
        ManualOutcome::Attached { workout_id } => ManualResponse {
            result: "attached",
            workout_id,
            streak: None,
        },
        ManualOutcome::Committed(workout) => ManualResponse {
            result: "committed",
            workout_id: workout.id,
            streak: workout.streak,
        },
    };
    Ok(Json(response))
}

// ─── Confirmations ───────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmationRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub provider: Provider,
    #[validate(length(min = 1, max = 128))]
    pub external_id: String,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct ConfirmationResponse {
    /// "committed", "declined" or "already_resolved"
    pub result: &'static str,
    pub workouts: usize,
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConfirmationRequest>,
) -> Result<Json<ConfirmationResponse>> {
    let body = validated(body)?;

    let outcome = state
        .pipeline
        .resolve_confirmation(
            &body.user_id,
            body.provider,
            &body.external_id,
            body.accepted,
            Utc::now(),
        )
        .await?;

    let response = match outcome {
        ConfirmationOutcome::Committed { workouts } => ConfirmationResponse {
            result: "committed",
            workouts,
        },
        ConfirmationOutcome::Declined => ConfirmationResponse {
            result: "declined",
            workouts: 0,
        },
        ConfirmationOutcome::AlreadyResolved => ConfirmationResponse {
            result: "already_resolved",
            workouts: 0,
        },
    };
    Ok(Json(response))
}
