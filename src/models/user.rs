// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use crate::models::Provider;
use crate::time_utils::fixed_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standing of a user inside one group.
///
/// A single enum per membership keeps the four states mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    /// Rejoined after a ban; needs fresh evidence within the deadline.
    Probation,
    /// Removed from the group; skipped by the sweep.
    Banned,
    /// One deadline cycle is waived; consumed by the next sweep.
    Immune,
}

/// A user's membership in one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: String,
    pub status: MembershipStatus,
    #[serde(with = "fixed_millis")]
    pub joined_at: DateTime<Utc>,
    #[serde(default, with = "fixed_millis::option")]
    pub rejoined_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn new(group_id: &str, joined_at: DateTime<Utc>) -> Self {
        Self {
            group_id: group_id.to_string(),
            status: MembershipStatus::Active,
            joined_at,
            rejoined_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != MembershipStatus::Banned
    }
}

/// OAuth link to a fitness provider account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderLink {
    pub provider: Provider,
    /// The provider's id for this user (matched against webhook payloads)
    pub external_user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "fixed_millis")]
    pub expires_at: DateTime<Utc>,
}

/// User profile stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User ID (also used as document ID)
    pub id: String,
    pub display_name: String,
    /// Ordinal into `models::rank::RANKS`
    #[serde(default)]
    pub rank_tier: usize,
    #[serde(default, with = "fixed_millis::option")]
    pub rank_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provider_links: Vec<ProviderLink>,
    #[serde(default)]
    pub memberships: Vec<Membership>,
}

impl User {
    pub fn link(&self, provider: Provider) -> Option<&ProviderLink> {
        self.provider_links.iter().find(|l| l.provider == provider)
    }

    /// Remove the link for `provider`. Returns `true` if one was present.
    pub fn unlink(&mut self, provider: Provider) -> bool {
        let before = self.provider_links.len();
        self.provider_links.retain(|l| l.provider != provider);
        before != self.provider_links.len()
    }

    pub fn membership(&self, group_id: &str) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.group_id == group_id)
    }

    pub fn membership_mut(&mut self, group_id: &str) -> Option<&mut Membership> {
        self.memberships.iter_mut().find(|m| m.group_id == group_id)
    }

    /// Groups in which the user still has to produce evidence.
    pub fn active_group_ids(&self) -> Vec<String> {
        self.memberships
            .iter()
            .filter(|m| m.is_active())
            .map(|m| m.group_id.clone())
            .collect()
    }
}
