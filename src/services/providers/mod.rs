// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitness-tracker provider APIs.
//!
//! Handles:
//! - HTTP clients for Garmin and Whoop
//! - Token refresh when expired, with an in-memory cache
//! - Unlinking accounts whose refresh token stopped working
//! - Mapping provider failures onto `AppError` kinds

pub mod garmin;
pub mod whoop;

pub use garmin::GarminClient;
pub use whoop::WhoopClient;

use crate::db::TimelineStore;
use crate::error::AppError;
use crate::models::{Provider, User};
use crate::services::notifier::Notifier;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use garmin::GarminActivitySummary;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use whoop::WhoopWorkout;

/// Token refresh result, normalized across providers.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp
    pub expires_at: i64,
}

/// Map a request that never got a response.
pub(crate) fn send_error(provider: Provider) -> impl Fn(reqwest::Error) -> AppError {
    move |e| AppError::TransientProvider(format!("{} request failed: {}", provider, e))
}

/// Map a non-success status onto an error kind.
fn status_error(provider: Provider, status: reqwest::StatusCode, body: &str) -> AppError {
    match status.as_u16() {
        429 => {
            tracing::warn!(%provider, "Provider rate limit hit (429)");
            AppError::TransientProvider(format!("{} rate limited", provider))
        }
        401 => AppError::AuthExpired(format!("{} rejected access token", provider)),
        404 => AppError::NotFound(format!("{} resource", provider)),
        s if s >= 500 => AppError::TransientProvider(format!("{} HTTP {}", provider, status)),
        _ => AppError::Internal(anyhow::anyhow!("{} HTTP {}: {}", provider, status, body)),
    }
}

/// Check response status and parse the JSON body.
pub(crate) async fn check_response_json<T: for<'de> Deserialize<'de>>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T, AppError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::TransientProvider(format!("{} JSON parse error: {}", provider, e)))
}

/// Like `check_response_json`, but a rejected grant (400/401) means the
/// refresh token is dead.
pub(crate) async fn check_token_response<T: for<'de> Deserialize<'de>>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T, AppError> {
    if matches!(response.status().as_u16(), 400 | 401) {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::AuthExpired(format!(
            "{} token refresh rejected: {}",
            provider, body
        )));
    }
    check_response_json(provider, response).await
}

/// Outbound provider calls, given a valid access token.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn refresh_token(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError>;

    async fn garmin_callback(
        &self,
        access_token: &str,
        callback_url: &str,
    ) -> Result<Vec<GarminActivitySummary>, AppError>;

    async fn whoop_workout(&self, access_token: &str, workout_id: i64) -> Result<WhoopWorkout, AppError>;

    async fn whoop_workouts_since(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WhoopWorkout>, AppError>;

    async fn whoop_cycle_strain(
        &self,
        access_token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, AppError>;
}

/// `ProviderApi` over the real HTTP clients.
#[derive(Clone)]
pub struct HttpProviderApi {
    garmin: GarminClient,
    whoop: WhoopClient,
}

impl HttpProviderApi {
    pub fn new(garmin: GarminClient, whoop: WhoopClient) -> Self {
        Self { garmin, whoop }
    }
}

#[async_trait]
impl ProviderApi for HttpProviderApi {
    async fn refresh_token(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        match provider {
            Provider::Garmin => self.garmin.refresh_token(refresh_token).await,
            Provider::Whoop => self.whoop.refresh_token(refresh_token).await,
        }
    }

    async fn garmin_callback(
        &self,
        access_token: &str,
        callback_url: &str,
    ) -> Result<Vec<GarminActivitySummary>, AppError> {
        self.garmin.fetch_callback(access_token, callback_url).await
    }

    async fn whoop_workout(&self, access_token: &str, workout_id: i64) -> Result<WhoopWorkout, AppError> {
        self.whoop.get_workout(access_token, workout_id).await
    }

    async fn whoop_workouts_since(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WhoopWorkout>, AppError> {
        self.whoop.list_workouts(access_token, since).await
    }

    async fn whoop_cycle_strain(
        &self,
        access_token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, AppError> {
        self.whoop.cycle_strain(access_token, at).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProviderService - token lifecycle on top of ProviderApi
// ─────────────────────────────────────────────────────────────────────────────

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

type TokenKey = (String, Provider);

/// Shared token cache type.
pub type TokenCache = Arc<DashMap<TokenKey, CachedToken>>;

/// Shared refresh locks type.
pub type RefreshLocks = Arc<DashMap<TokenKey, Arc<Mutex<()>>>>;

/// Provider calls on behalf of a user, with token management.
///
/// Tokens live on the user's `ProviderLink`. A refresh that the provider
/// rejects removes the link and tells the user to reconnect.
#[derive(Clone)]
pub struct ProviderService {
    api: Arc<dyn ProviderApi>,
    store: Arc<dyn TimelineStore>,
    notifier: Arc<dyn Notifier>,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
}

impl ProviderService {
    pub fn new(
        api: Arc<dyn ProviderApi>,
        store: Arc<dyn TimelineStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            api,
            store,
            notifier,
            token_cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Get a valid (non-expired) access token for the user's link.
    pub async fn get_valid_access_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        let key: TokenKey = (user_id.to_string(), provider);

        if let Some(cached) = self.token_cache.get(&key) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        // Only one task per (user, provider) refreshes; the rest wait here.
        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(cached) = self.token_cache.get(&key) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;
        let link = user
            .link(provider)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("{} link for user {}", provider, user_id)))?;

        if now + margin < link.expires_at {
            self.token_cache.insert(
                key,
                CachedToken {
                    access_token: link.access_token.clone(),
                    expires_at: link.expires_at,
                },
            );
            return Ok(link.access_token);
        }

        tracing::info!(user_id, %provider, "Access token expired, refreshing");

        let refreshed = match self.api.refresh_token(provider, &link.refresh_token).await {
            Ok(t) => t,
            Err(e) if e.is_auth_expired() => {
                tracing::warn!(user_id, %provider, error = %e, "Refresh rejected, unlinking account");
                self.unlink(&user.id, provider, true).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let expires_at = DateTime::from_timestamp(refreshed.expires_at, 0).unwrap_or(now);
        // Only the link is rewritten; the rest of the user may have moved on.
        let mut apply = |u: &mut User| match u.provider_links.iter_mut().find(|l| l.provider == provider) {
            Some(stored) => {
                stored.access_token = refreshed.access_token.clone();
                stored.refresh_token = refreshed.refresh_token.clone();
                stored.expires_at = expires_at;
                true
            }
            None => false,
        };
        self.store.update_user(user_id, &mut apply).await?;

        self.token_cache.insert(
            key,
            CachedToken {
                access_token: refreshed.access_token.clone(),
                expires_at,
            },
        );

        tracing::info!(user_id, %provider, "Token refreshed and cached");
        Ok(refreshed.access_token)
    }

    /// Remove the user's link to `provider` (deregistration, revoked
    /// permissions, dead refresh token).
    pub async fn disconnect(
        &self,
        user_id: &str,
        provider: Provider,
        notify: bool,
    ) -> Result<bool, AppError> {
        self.unlink(user_id, provider, notify).await
    }

    async fn unlink(&self, user_id: &str, provider: Provider, notify: bool) -> Result<bool, AppError> {
        self.token_cache.remove(&(user_id.to_string(), provider));

        let mut removed = false;
        let mut apply = |u: &mut User| {
            removed = u.unlink(provider);
            removed
        };
        self.store.update_user(user_id, &mut apply).await?;
        if !removed {
            return Ok(false);
        }
        tracing::info!(user_id, %provider, "Provider account unlinked");

        if notify {
            let message = format!(
                "Your {} connection expired. Please reconnect it to keep activities syncing.",
                provider
            );
            if let Err(e) = self.notifier.notify_user(user_id, &message).await {
                tracing::warn!(user_id, error = %e, "Failed to notify user about unlink");
            }
        }
        Ok(true)
    }

    /// Fetch the summaries behind a Garmin ping.
    pub async fn fetch_garmin_callback(
        &self,
        user_id: &str,
        callback_url: &str,
    ) -> Result<Vec<GarminActivitySummary>, AppError> {
        let token = self.get_valid_access_token(user_id, Provider::Garmin).await?;
        self.api.garmin_callback(&token, callback_url).await
    }

    pub async fn whoop_workout(&self, user_id: &str, workout_id: i64) -> Result<WhoopWorkout, AppError> {
        let token = self.get_valid_access_token(user_id, Provider::Whoop).await?;
        self.api.whoop_workout(&token, workout_id).await
    }

    pub async fn whoop_workouts_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WhoopWorkout>, AppError> {
        let token = self.get_valid_access_token(user_id, Provider::Whoop).await?;
        self.api.whoop_workouts_since(&token, since).await
    }

    pub async fn whoop_cycle_strain(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, AppError> {
        let token = self.get_valid_access_token(user_id, Provider::Whoop).await?;
        self.api.whoop_cycle_strain(&token, at).await
    }
}
