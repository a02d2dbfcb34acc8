// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Streakguard: accountability groups for workouts
//!
//! This crate provides the backend that reconciles activity evidence from
//! manual uploads and fitness trackers into workouts, keeps streaks and
//! ranks, and enforces the group deadline.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::TimelineStore;
use services::notifier::Notifier;
use services::providers::{ProviderApi, ProviderService};
use services::{ActivityPipeline, EnforcementScheduler, TtlStore};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TimelineStore>,
    pub pipeline: ActivityPipeline,
    pub scheduler: Arc<EnforcementScheduler>,
}

impl AppState {
    /// Wire the engine together from its collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn TimelineStore>,
        ttl: Arc<dyn TtlStore>,
        provider_api: Arc<dyn ProviderApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let policy = config.policy.clone();
        let providers = ProviderService::new(provider_api, store.clone(), notifier.clone());
        let pipeline = ActivityPipeline::new(
            store.clone(),
            ttl,
            providers,
            notifier.clone(),
            policy.clone(),
        );
        let scheduler = Arc::new(EnforcementScheduler::new(store.clone(), notifier, policy));

        Self {
            config,
            store,
            pipeline,
            scheduler,
        }
    }
}
