// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Operator actions (admin token required).

use crate::error::{AppError, Result};
use crate::middleware::auth::ServicePrincipal;
use crate::models::{rank, MembershipStatus, Source, User, Workout};
use crate::services::enforcement::SweepReport;
use crate::services::rank::override_rank;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Admin routes. The auth middleware is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/workouts/{workout_id}/rollback", post(rollback_workout))
        .route("/admin/users/{user_id}/rank", post(set_rank))
        .route("/admin/users/{user_id}/immunity", post(grant_immunity))
        .route("/admin/users/{user_id}/rejoin", post(rejoin))
        .route("/admin/sweep", post(run_sweep))
}

#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub user_id: String,
    pub group_id: String,
    pub status: MembershipStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GroupRequest {
    #[validate(length(min = 1, max = 128))]
    pub group_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RankRequest {
    #[validate(length(min = 1, max = 64))]
    pub rank: String,
}

/// Delete a workout. The next most recent workout becomes the deadline
/// baseline on the following sweep.
async fn rollback_workout(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<ServicePrincipal>,
    Path(workout_id): Path<String>,
) -> Result<Json<Workout>> {
    let workout = state
        .store
        .get_workout(&workout_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Workout {}", workout_id)))?;

    state.store.delete_workout(&workout_id).await?;

    let baseline = state
        .store
        .recent_workouts(&workout.user_id, &workout.group_id, 1)
        .await?
        .into_iter()
        .next();
    tracing::info!(
        admin = %admin.subject,
        workout_id,
        user_id = %workout.user_id,
        group_id = %workout.group_id,
        new_baseline = ?baseline.as_ref().map(|w| w.created_at),
        "Workout rolled back"
    );
    Ok(Json(workout))
}

async fn set_rank(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<ServicePrincipal>,
    Path(user_id): Path<String>,
    Json(body): Json<RankRequest>,
) -> Result<Json<serde_json::Value>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let now = Utc::now();
    let mut previous = 0;
    let mut outcome = None;
    let mut apply = |user: &mut User| {
        previous = user.rank_tier;
        let result = override_rank(user, &body.rank, now);
        let changed = result.is_ok();
        outcome = Some(result);
        changed
    };
    state.store.update_user(&user_id, &mut apply).await?;
    let tier = outcome.ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))??;

    tracing::info!(
        admin = %admin.subject,
        user_id,
        from = rank::name_of(previous),
        to = rank::name_of(tier),
        "Rank overridden"
    );
    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "rank": rank::name_of(tier),
    })))
}

async fn grant_immunity(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<ServicePrincipal>,
    Path(user_id): Path<String>,
    Json(body): Json<GroupRequest>,
) -> Result<Json<MembershipResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let mut found = None;
    let mut apply = |user: &mut User| {
        let Some(membership) = user.membership_mut(&body.group_id) else {
            return false;
        };
        found = Some(membership.status);
        if membership.status == MembershipStatus::Banned {
            return false;
        }
        membership.status = MembershipStatus::Immune;
        true
    };
    state.store.update_user(&user_id, &mut apply).await?;
    match found {
        None => {
            return Err(AppError::NotFound(format!(
                "Membership {}/{}",
                user_id, body.group_id
            )))
        }
        Some(MembershipStatus::Banned) => {
            return Err(AppError::BadRequest(
                "Banned members must rejoin before immunity is granted".to_string(),
            ))
        }
        Some(_) => {}
    }

    tracing::info!(admin = %admin.subject, user_id, group_id = %body.group_id, "Immunity granted");
    Ok(Json(MembershipResponse {
        user_id,
        group_id: body.group_id,
        status: MembershipStatus::Immune,
    }))
}

/// Readmit a member on probation.
async fn rejoin(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<ServicePrincipal>,
    Path(user_id): Path<String>,
    Json(body): Json<GroupRequest>,
) -> Result<Json<MembershipResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let now = Utc::now();
    let mut found = false;
    let mut apply = |user: &mut User| {
        let Some(membership) = user.membership_mut(&body.group_id) else {
            return false;
        };
        found = true;
        membership.status = MembershipStatus::Probation;
        membership.rejoined_at = Some(now);
        true
    };
    state.store.update_user(&user_id, &mut apply).await?;
    if !found {
        return Err(AppError::NotFound(format!(
            "Membership {}/{}",
            user_id, body.group_id
        )));
    }

    let mut placeholder = Workout::synthetic(&user_id, &body.group_id, now, Source::Rejoin);
    placeholder.streak = Some(0);
    state.store.put_workout(&placeholder).await?;

    tracing::info!(admin = %admin.subject, user_id, group_id = %body.group_id, "Member rejoined on probation");
    Ok(Json(MembershipResponse {
        user_id,
        group_id: body.group_id,
        status: MembershipStatus::Probation,
    }))
}

async fn run_sweep(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<ServicePrincipal>,
) -> Result<Json<SweepReport>> {
    tracing::info!(admin = %admin.subject, "Manual sweep requested");
    let report = state.scheduler.sweep(Utc::now()).await?;
    Ok(Json(report))
}
