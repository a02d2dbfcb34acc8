// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod activity;
pub mod event;
pub mod group;
pub mod rank;
pub mod user;
pub mod workout;

pub use activity::{ActivityRecord, Provider};
pub use event::{Event, EventKind};
pub use group::Group;
pub use rank::RankTier;
pub use user::{Membership, MembershipStatus, ProviderLink, User};
pub use workout::{Source, Workout};
