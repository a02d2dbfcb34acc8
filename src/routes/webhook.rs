// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Garmin and Whoop events.
//!
//! Providers retry aggressively on anything but 200, and a retry can never
//! fix a payload we could not parse, so every handler answers 200 once the
//! body has been read. The only exception is a bad Whoop signature.

use crate::models::Provider;
use crate::services::ingest::{log_failure, IngestReport};
use crate::services::providers::garmin::{
    GarminActivitiesPayload, GarminDeregistrationsPayload, GarminPermissionsPayload,
};
use crate::services::providers::whoop::{verify_signature, WhoopWebhookEvent};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use chrono::Utc;
use std::sync::Arc;

pub const WHOOP_SIGNATURE_HEADER: &str = "X-WHOOP-Signature";
pub const WHOOP_TIMESTAMP_HEADER: &str = "X-WHOOP-Signature-Timestamp";

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook/garmin/activities", post(garmin_activities))
        .route("/webhook/garmin/deregistrations", post(garmin_deregistrations))
        .route("/webhook/garmin/permissions", post(garmin_permissions))
        .route("/webhook/whoop", post(whoop_event))
}

/// Garmin activity push or ping (POST).
async fn garmin_activities(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let payload: GarminActivitiesPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse Garmin activities payload");
            return (StatusCode::OK, Json(IngestReport::default()));
        }
    };

    tracing::info!(entries = payload.activities.len(), "Garmin activities received");
    let report = state.pipeline.ingest_garmin(payload, Utc::now()).await;
    (StatusCode::OK, Json(report))
}

/// Garmin user deregistration (POST).
async fn garmin_deregistrations(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let payload: GarminDeregistrationsPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse Garmin deregistrations");
            return StatusCode::OK;
        }
    };

    for entry in payload.deregistrations {
        disconnect(&state, &entry.user_id, "deregistration").await;
    }
    StatusCode::OK
}

/// Garmin permission change (POST). An empty permission list means the
/// user disconnected us.
async fn garmin_permissions(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    let payload: GarminPermissionsPayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse Garmin permission change");
            return StatusCode::OK;
        }
    };

    for change in payload.user_permissions_change {
        if change.permissions.is_empty() {
            disconnect(&state, &change.user_id, "permissions revoked").await;
        } else {
            tracing::debug!(
                garmin_user = %change.user_id,
                permissions = ?change.permissions,
                "Garmin permissions changed"
            );
        }
    }
    StatusCode::OK
}

async fn disconnect(state: &AppState, garmin_user: &str, reason: &str) {
    match state.pipeline.disconnect(Provider::Garmin, garmin_user).await {
        Ok(removed) => tracing::info!(garmin_user, reason, removed, "Garmin account disconnected"),
        Err(e) => log_failure(Provider::Garmin, garmin_user, &e),
    }
}

/// Signed Whoop event (POST).
async fn whoop_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) =
        (header(WHOOP_SIGNATURE_HEADER), header(WHOOP_TIMESTAMP_HEADER))
    else {
        tracing::warn!("Security Alert: Whoop webhook without signature headers");
        return StatusCode::UNAUTHORIZED;
    };

    if !verify_signature(&state.config.whoop_client_secret, timestamp, &body, signature) {
        tracing::warn!("Security Alert: Whoop webhook signature mismatch");
        return StatusCode::UNAUTHORIZED;
    }

    let event: WhoopWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse Whoop webhook event");
            return StatusCode::OK;
        }
    };

    if !event.is_workout_update() {
        tracing::debug!(event_type = %event.event_type, "Ignoring unhandled Whoop event type");
        return StatusCode::OK;
    }

    tracing::info!(
        whoop_user = event.user_id,
        workout_id = event.id,
        trace_id = ?event.trace_id,
        "Whoop workout event received"
    );

    if let Err(e) = state.pipeline.ingest_whoop_event(&event, Utc::now()).await {
        log_failure(Provider::Whoop, &event.id.to_string(), &e);
    }
    StatusCode::OK
}
