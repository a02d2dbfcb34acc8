// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests for the internal and admin APIs and their auth.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::json;
use streakguard::config::{Config, ConfirmationPolicy};
use streakguard::db::TimelineStore;
use streakguard::middleware::auth::Role;
use streakguard::models::{Group, MembershipStatus, Provider, Source};
use streakguard::services::ingest::IngestOutcome;
use tower::ServiceExt;

mod common;
use common::{record, TestHarness};

fn post(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn setup() -> TestHarness {
    let h = TestHarness::new();
    h.add_group("g1").await;
    h.add_member("u1", "g1", Utc::now() - Duration::days(10)).await;
    h
}

// ═══════════════════════════════════════════════════════════════════════════
// AUTHENTICATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_internal_requires_token() {
    let h = setup().await;

    let response = h
        .router()
        .oneshot(post(
            "/internal/manual",
            None,
            json!({ "user_id": "u1", "group_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(h.workouts("u1", "g1").await.is_empty());
}

#[tokio::test]
async fn test_token_with_wrong_key_rejected() {
    let h = setup().await;
    let forged = streakguard::middleware::auth::create_jwt(
        "mallory",
        Role::Admin,
        b"some_other_signing_key_32_bytes!",
    )
    .unwrap();

    let response = h
        .router()
        .oneshot(post("/admin/sweep", Some(&forged), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bot_token_cannot_use_admin_routes() {
    let h = setup().await;
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post("/admin/sweep", Some(&token), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_token_can_use_internal_routes() {
    let h = setup().await;
    let token = h.token(Role::Admin);

    let response = h
        .router()
        .oneshot(post(
            "/internal/manual",
            Some(&token),
            json!({ "user_id": "u1", "group_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERNAL API
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_manual_upload_commits() {
    let h = setup().await;
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post(
            "/internal/manual",
            Some(&token),
            json!({ "user_id": "u1", "group_id": "g1", "photo_ref": "photos/abc.jpg" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"], "committed");
    assert_eq!(h.workouts("u1", "g1").await.len(), 1);
}

#[tokio::test]
async fn test_manual_upload_for_non_member_is_404() {
    let h = setup().await;
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post(
            "/internal/manual",
            Some(&token),
            json!({ "user_id": "u1", "group_id": "elsewhere" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_upload_validates_body() {
    let h = setup().await;
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post(
            "/internal/manual",
            Some(&token),
            json!({ "user_id": "", "group_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_approved_group() {
    let h = setup().await;
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post(
            "/internal/members",
            Some(&token),
            json!({ "user_id": "u2", "display_name": "Robin", "group_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "active");
    let user = h.user("u2").await;
    assert_eq!(user.display_name, "Robin");
    assert!(user.membership("g1").is_some());
}

#[tokio::test]
async fn test_join_unapproved_group_rejected() {
    let h = setup().await;
    h.store
        .upsert_group(&Group {
            id: "pending".to_string(),
            chat_ref: "chat-pending".to_string(),
            approved: false,
        })
        .await
        .unwrap();
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post(
            "/internal/members",
            Some(&token),
            json!({ "user_id": "u2", "display_name": "Robin", "group_id": "pending" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_link_provider_account() {
    let h = setup().await;
    h.add_member("u2", "g1", Utc::now() - Duration::days(1)).await;
    let token = h.token(Role::Bot);
    let body = |user: &str| {
        json!({
            "user_id": user,
            "provider": "garmin",
            "external_user_id": "garmin-new",
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": (Utc::now() + Duration::hours(1)).to_rfc3339()
        })
    };

    let response = h
        .router()
        .oneshot(post("/internal/links", Some(&token), body("u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let user = h.user("u1").await;
    assert_eq!(
        user.link(Provider::Garmin).map(|l| l.external_user_id.as_str()),
        Some("garmin-new")
    );

    // The same Garmin account cannot be claimed by a second user.
    let response = h
        .router()
        .oneshot(post("/internal/links", Some(&token), body("u2")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_confirmation_round_trip() {
    let mut config = Config::test_default();
    config.policy.confirmation = ConfirmationPolicy::Always;
    let h = TestHarness::with_config(config);
    h.add_group("g1").await;
    let user = h.add_member("u1", "g1", Utc::now() - Duration::days(10)).await;

    let now = Utc::now();
    let outcome = h
        .state
        .pipeline
        .process_record(&user, record(Provider::Garmin, "41001", now - Duration::hours(1), 40), now)
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::AwaitingConfirmation);
    assert_eq!(h.notifier.prompts().len(), 1);

    let token = h.token(Role::Bot);
    let response = h
        .router()
        .oneshot(post(
            "/internal/confirmations",
            Some(&token),
            json!({
                "user_id": "u1",
                "provider": "garmin",
                "external_id": "41001",
                "accepted": true
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"], "committed");
    assert_eq!(json["workouts"], 1);
    assert_eq!(h.workouts("u1", "g1").await.len(), 1);
}

#[tokio::test]
async fn test_confirmation_without_pending_is_404() {
    let h = setup().await;
    let token = h.token(Role::Bot);

    let response = h
        .router()
        .oneshot(post(
            "/internal/confirmations",
            Some(&token),
            json!({
                "user_id": "u1",
                "provider": "whoop",
                "external_id": "999",
                "accepted": true
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ═══════════════════════════════════════════════════════════════════════════
// ADMIN API
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_rollback_deletes_workout() {
    let h = setup().await;
    let older = h.add_workout("u1", "g1", Utc::now() - Duration::days(2)).await;
    let latest = h.add_workout("u1", "g1", Utc::now() - Duration::hours(1)).await;
    let token = h.token(Role::Admin);

    let response = h
        .router()
        .oneshot(post(
            &format!("/admin/workouts/{}/rollback", latest.id),
            Some(&token),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let remaining = h.workouts("u1", "g1").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, older.id);

    let missing = h
        .router()
        .oneshot(post(
            &format!("/admin/workouts/{}/rollback", latest.id),
            Some(&token),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rank_override() {
    let h = setup().await;
    let token = h.token(Role::Admin);

    let response = h
        .router()
        .oneshot(post(
            "/admin/users/u1/rank",
            Some(&token),
            json!({ "rank": "iron" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["rank"], "Iron");
    assert_eq!(h.user("u1").await.rank_tier, 5);

    let unknown = h
        .router()
        .oneshot(post(
            "/admin/users/u1/rank",
            Some(&token),
            json!({ "rank": "Emperor" }),
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_grant_immunity() {
    let h = setup().await;
    let token = h.token(Role::Admin);

    let response = h
        .router()
        .oneshot(post(
            "/admin/users/u1/immunity",
            Some(&token),
            json!({ "group_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        h.user("u1").await.membership("g1").unwrap().status,
        MembershipStatus::Immune
    );
}

#[tokio::test]
async fn test_rejoin_sets_probation_with_marker() {
    let h = setup().await;
    h.add_workout("u1", "g1", Utc::now() - Duration::days(8)).await;
    let mut user = h.user("u1").await;
    user.membership_mut("g1").unwrap().status = MembershipStatus::Banned;
    h.store.upsert_user(&user).await.unwrap();
    let token = h.token(Role::Admin);

    let response = h
        .router()
        .oneshot(post(
            "/admin/users/u1/rejoin",
            Some(&token),
            json!({ "group_id": "g1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let membership = h.user("u1").await.membership("g1").cloned().unwrap();
    assert_eq!(membership.status, MembershipStatus::Probation);
    assert!(membership.rejoined_at.is_some());

    let latest = &h.workouts("u1", "g1").await[0];
    assert_eq!(latest.source, Source::Rejoin);
    assert_eq!(latest.streak, Some(0));

    // Inside the rejoin grace the overdue member survives a sweep.
    let report = h.state.scheduler.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.banned, 0);
}

#[tokio::test]
async fn test_admin_sweep_returns_report() {
    let h = setup().await;
    h.add_workout("u1", "g1", Utc::now() - Duration::days(6)).await;
    let token = h.token(Role::Admin);

    let response = h
        .router()
        .oneshot(post("/admin/sweep", Some(&token), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["skipped"], false);
    assert_eq!(json["banned"], 1);
    assert_eq!(h.notifier.removals().len(), 1);
}
