// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running.
//! Set FIRESTORE_EMULATOR_HOST to run them; otherwise they are skipped.
//!
//! Every test uses fresh ids, so a shared emulator needs no cleanup.

use chrono::{Duration, TimeZone, Utc};
use streakguard::db::TimelineStore;
use streakguard::models::{
    Event, EventKind, Group, Membership, Provider, ProviderLink, Source, User, Workout,
};

mod common;
use common::{test_db, unique_id};

/// Helper to create a basic test user in `group_id`.
fn test_user(user_id: &str, group_id: &str) -> User {
    User {
        id: user_id.to_string(),
        display_name: "Test User".to_string(),
        rank_tier: 0,
        rank_changed_at: None,
        provider_links: vec![ProviderLink {
            provider: Provider::Garmin,
            external_user_id: format!("garmin-{}", user_id),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        }],
        memberships: vec![Membership::new(
            group_id,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        )],
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// USER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_user_roundtrip() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_id("user");

    assert!(db.get_user(&user_id).await.unwrap().is_none());

    let user = test_user(&user_id, "g1");
    db.upsert_user(&user).await.unwrap();

    let fetched = db.get_user(&user_id).await.unwrap().expect("user stored");
    assert_eq!(fetched.display_name, "Test User");
    assert_eq!(fetched.memberships.len(), 1);
    assert_eq!(fetched.memberships[0].joined_at, user.memberships[0].joined_at);

    println!("✓ User roundtrip verified: user_id={}", user_id);
}

#[tokio::test]
async fn test_provider_index_follows_unlink() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_id("user");
    let mut user = test_user(&user_id, "g1");
    db.upsert_user(&user).await.unwrap();

    let external = format!("garmin-{}", user_id);
    let found = db
        .find_user_by_provider(Provider::Garmin, &external)
        .await
        .unwrap();
    assert_eq!(found.map(|u| u.id), Some(user_id.clone()));

    user.unlink(Provider::Garmin);
    db.upsert_user(&user).await.unwrap();

    let after = db
        .find_user_by_provider(Provider::Garmin, &external)
        .await
        .unwrap();
    assert!(after.is_none(), "unlinked account must not resolve");

    println!("✓ Provider index verified: user_id={}", user_id);
}

#[tokio::test]
async fn test_group_roundtrip() {
    require_emulator!();

    let db = test_db().await;
    let group = Group {
        id: unique_id("group"),
        chat_ref: "chat-123".to_string(),
        approved: true,
    };
    db.upsert_group(&group).await.unwrap();

    let fetched = db.get_group(&group.id).await.unwrap().expect("group stored");
    assert!(fetched.approved);
    assert_eq!(fetched.chat_ref, "chat-123");
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKOUT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_recent_workouts_order_and_cancelled() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_id("user");
    let group_id = unique_id("group");
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let oldest = Workout::manual(&user_id, &group_id, base);
    let middle = Workout::manual(&user_id, &group_id, base + Duration::days(1));
    let mut cancelled = Workout::manual(&user_id, &group_id, base + Duration::days(2));
    cancelled.cancelled = true;
    for w in [&oldest, &middle, &cancelled] {
        db.put_workout(w).await.unwrap();
    }

    let recent = db.recent_workouts(&user_id, &group_id, 2).await.unwrap();
    let ids: Vec<&str> = recent.iter().map(|w| w.id.as_str()).collect();
    assert_eq!(ids, vec![middle.id.as_str(), oldest.id.as_str()]);

    let between = db
        .workouts_between(&user_id, &group_id, base + Duration::hours(1), base + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(between.len(), 1);
    assert_eq!(between[0].id, middle.id);

    println!("✓ Workout queries verified: user_id={}", user_id);
}

#[tokio::test]
async fn test_external_id_lookup_and_delete() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_id("user");
    let group_id = unique_id("group");

    let mut workout = Workout::synthetic(&user_id, &group_id, Utc::now(), Source::Immunity);
    workout.provider = Some(Provider::Whoop);
    workout.external_id = Some("777".to_string());
    db.put_workout(&workout).await.unwrap();

    assert!(db
        .has_workout_with_external_id(&user_id, Provider::Whoop, "777")
        .await
        .unwrap());
    assert!(!db
        .has_workout_with_external_id(&user_id, Provider::Garmin, "777")
        .await
        .unwrap());

    db.delete_workout(&workout.id).await.unwrap();
    assert!(db.get_workout(&workout.id).await.unwrap().is_none());
    assert!(!db
        .has_workout_with_external_id(&user_id, Provider::Whoop, "777")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_group_workouts_since() {
    require_emulator!();

    let db = test_db().await;
    let group_id = unique_id("group");
    let now = Utc::now();

    for (user, days) in [("a", 1), ("b", 3), ("c", 10)] {
        db.put_workout(&Workout::manual(user, &group_id, now - Duration::days(days)))
            .await
            .unwrap();
    }

    let week = db
        .group_workouts_since(&group_id, now - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(week.len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// EVENT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_event_lookup() {
    require_emulator!();

    let db = test_db().await;
    let group_id = unique_id("group");
    let at = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();

    db.append_event(&Event::new("u1", &group_id, EventKind::LastDayNotice, at))
        .await
        .unwrap();

    assert!(db
        .has_event_since(&group_id, Some("u1"), EventKind::LastDayNotice, at - Duration::hours(1))
        .await
        .unwrap());
    assert!(!db
        .has_event_since(&group_id, Some("u2"), EventKind::LastDayNotice, at - Duration::hours(1))
        .await
        .unwrap());
    assert!(!db
        .has_event_since(&group_id, None, EventKind::LastDayNotice, at + Duration::minutes(1))
        .await
        .unwrap());
    assert!(!db
        .has_event_since(&group_id, None, EventKind::Ban, at - Duration::days(1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_cycle_event_lookup() {
    require_emulator!();

    let db = test_db().await;
    let group_id = unique_id("group");
    let cycle = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
    let sent = cycle + Duration::days(4) + Duration::hours(1);

    db.append_event(&Event::new("u1", &group_id, EventKind::LastDayNotice, sent).for_cycle(cycle))
        .await
        .unwrap();

    assert!(db
        .has_cycle_event(&group_id, "u1", EventKind::LastDayNotice, cycle)
        .await
        .unwrap());
    assert!(!db
        .has_cycle_event(&group_id, "u1", EventKind::LastDayNotice, sent - Duration::hours(1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_update_user_and_batch_workouts() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_id("user");
    db.upsert_user(&test_user(&user_id, "g1")).await.unwrap();

    let mut rotate = |user: &mut User| {
        user.provider_links[0].access_token = "rotated".to_string();
        true
    };
    let updated = db.update_user(&user_id, &mut rotate).await.unwrap();
    assert_eq!(
        updated.map(|u| u.provider_links[0].access_token.clone()).as_deref(),
        Some("rotated")
    );
    let mut noop = |_: &mut User| true;
    assert!(db.update_user(&unique_id("missing"), &mut noop).await.unwrap().is_none());

    let at = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
    let batch = vec![
        Workout::manual(&user_id, "g1", at),
        Workout::manual(&user_id, "g2", at),
    ];
    db.put_workouts(&batch).await.unwrap();
    assert_eq!(db.recent_workouts(&user_id, "g1", 5).await.unwrap().len(), 1);
    assert_eq!(db.recent_workouts(&user_id, "g2", 5).await.unwrap().len(), 1);
}
