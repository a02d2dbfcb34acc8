// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Idempotency gate shared by every provider.
//!
//! Webhooks get redelivered, the sync loop re-reads the same window and
//! several sub-resources of one activity arrive at once. Everything goes
//! through `admit` so each logical activity is processed once.

use crate::config::EnginePolicy;
use crate::db::TimelineStore;
use crate::error::AppError;
use crate::models::{ActivityRecord, Provider};
use crate::services::lock::TtlStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why an activity was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    AlreadyCommitted,
    InFlight,
    Ignored,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Dropped(DropReason),
}

/// Activity parked until its owner answers the confirmation prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub user_id: String,
    pub record: ActivityRecord,
}

fn lock_key(provider: Provider, external_id: &str) -> String {
    format!("lock:{}:{}", provider, external_id)
}

fn pending_key(provider: Provider, external_id: &str) -> String {
    format!("pending:{}:{}", provider, external_id)
}

fn ignored_key(provider: Provider, external_id: &str) -> String {
    format!("ignored:{}:{}", provider, external_id)
}

#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn TimelineStore>,
    ttl: Arc<dyn TtlStore>,
    policy: EnginePolicy,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn TimelineStore>, ttl: Arc<dyn TtlStore>, policy: EnginePolicy) -> Self {
        Self { store, ttl, policy }
    }

    /// Decide whether `record` may be processed now.
    ///
    /// Checks run in order: committed, in-flight lock, ignored, pending.
    /// On `Proceed` the caller holds the in-flight lock until it expires or
    /// is released; on a later drop the lock is given back at once.
    pub async fn admit(&self, user_id: &str, record: &ActivityRecord) -> Result<Admission, AppError> {
        let (provider, id) = (record.provider, record.external_id.as_str());

        if self
            .store
            .has_workout_with_external_id(user_id, provider, id)
            .await?
        {
            return Ok(Admission::Dropped(DropReason::AlreadyCommitted));
        }

        if !self
            .ttl
            .set_if_absent(&lock_key(provider, id), user_id, self.policy.lock_ttl)
            .await?
        {
            return Ok(Admission::Dropped(DropReason::InFlight));
        }

        let settled = if self.ttl.get(&ignored_key(provider, id)).await?.is_some() {
            Some(DropReason::Ignored)
        } else if self.ttl.get(&pending_key(provider, id)).await?.is_some() {
            Some(DropReason::AwaitingConfirmation)
        } else {
            None
        };

        match settled {
            Some(reason) => {
                self.release(record).await?;
                Ok(Admission::Dropped(reason))
            }
            None => Ok(Admission::Proceed),
        }
    }

    /// Drop the in-flight lock so the next delivery can retry.
    pub async fn release(&self, record: &ActivityRecord) -> Result<(), AppError> {
        self.ttl
            .remove(&lock_key(record.provider, &record.external_id))
            .await
    }

    /// Park `record` for confirmation and give back the in-flight lock, so
    /// redeliveries report `AwaitingConfirmation`.
    pub async fn park_pending(&self, user_id: &str, record: &ActivityRecord) -> Result<(), AppError> {
        let pending = PendingConfirmation {
            user_id: user_id.to_string(),
            record: record.clone(),
        };
        self.ttl
            .set(
                &pending_key(record.provider, &record.external_id),
                &serde_json::to_string(&pending)?,
                self.policy.pending_ttl,
            )
            .await?;
        self.release(record).await
    }

    /// Read a parked activity without claiming it.
    pub async fn peek_pending(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<PendingConfirmation>, AppError> {
        match self.ttl.get(&pending_key(provider, external_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Claim a parked activity. Only one caller ever gets it.
    pub async fn take_pending(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<PendingConfirmation>, AppError> {
        match self.ttl.take(&pending_key(provider, external_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Suppress a declined activity for the ignored TTL.
    pub async fn mark_ignored(&self, provider: Provider, external_id: &str) -> Result<(), AppError> {
        self.ttl
            .set(
                &ignored_key(provider, external_id),
                "declined",
                self.policy.ignored_ttl,
            )
            .await
    }
}
