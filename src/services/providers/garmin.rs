// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Garmin Health API client and push payloads.
//!
//! Garmin delivers activities in one of two shapes: a push that embeds the
//! summary, or a ping that carries only a `callbackURL` to fetch it from.

use super::{check_response_json, send_error, TokenRefreshResponse};
use crate::error::AppError;
use crate::models::Provider;
use serde::{Deserialize, Serialize};

const TOKEN_URL: &str = "https://diauth.garmin.com/di-oauth2-service/oauth/token";

/// Callback URLs must point here; we attach the user's bearer token.
const CALLBACK_HOST_SUFFIX: &str = ".garmin.com";

/// Reject callback URLs that do not point at Garmin over HTTPS.
pub fn check_callback_url(callback_url: &str) -> Result<(), AppError> {
    let url = reqwest::Url::parse(callback_url)
        .map_err(|e| AppError::Validation(format!("Bad Garmin callback URL: {}", e)))?;
    let trusted = url.scheme() == "https"
        && url
            .host_str()
            .is_some_and(|h| h.ends_with(CALLBACK_HOST_SUFFIX));
    if !trusted {
        return Err(AppError::Validation(format!(
            "Untrusted Garmin callback host: {}",
            url.host_str().unwrap_or("")
        )));
    }
    Ok(())
}

/// Garmin Health API client.
#[derive(Clone)]
pub struct GarminClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GarminClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: TOKEN_URL.to_string(),
            client_id,
            client_secret,
        }
    }

    /// Fetch the summaries behind a ping's callback URL.
    pub async fn fetch_callback(
        &self,
        access_token: &str,
        callback_url: &str,
    ) -> Result<Vec<GarminActivitySummary>, AppError> {
        check_callback_url(callback_url)?;
        let response = self
            .http
            .get(callback_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(send_error(Provider::Garmin))?;

        check_response_json(Provider::Garmin, response).await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(send_error(Provider::Garmin))?;

        let refreshed: GarminTokenResponse = super::check_token_response(Provider::Garmin, response).await?;
        Ok(refreshed.into())
    }
}

#[derive(Debug, Deserialize)]
struct GarminTokenResponse {
    access_token: String,
    refresh_token: String,
    /// Lifetime in seconds
    expires_in: i64,
}

impl From<GarminTokenResponse> for TokenRefreshResponse {
    fn from(t: GarminTokenResponse) -> Self {
        TokenRefreshResponse {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_at: chrono::Utc::now().timestamp() + t.expires_in,
        }
    }
}

/// Activity summary as pushed by Garmin or returned from a callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminActivitySummary {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub summary_id: String,
    pub activity_type: Option<String>,
    pub start_time_in_seconds: Option<i64>,
    pub duration_in_seconds: Option<u32>,
    pub average_heart_rate_in_beats_per_minute: Option<f64>,
    pub active_kilocalories: Option<f64>,
    pub distance_in_meters: Option<f64>,
    pub device_name: Option<String>,
}

/// One entry of an activities push or ping.
#[derive(Debug, Clone, Deserialize)]
pub struct GarminActivityEntry {
    #[serde(rename = "callbackURL")]
    pub callback_url: Option<String>,
    #[serde(flatten)]
    pub summary: GarminActivitySummary,
}

/// Body of `POST /webhook/garmin/activities`.
#[derive(Debug, Clone, Deserialize)]
pub struct GarminActivitiesPayload {
    #[serde(default)]
    pub activities: Vec<GarminActivityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminDeregistration {
    pub user_id: String,
}

/// Body of `POST /webhook/garmin/deregistrations`.
#[derive(Debug, Clone, Deserialize)]
pub struct GarminDeregistrationsPayload {
    #[serde(default)]
    pub deregistrations: Vec<GarminDeregistration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminPermissionChange {
    pub user_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Body of `POST /webhook/garmin/permissions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminPermissionsPayload {
    #[serde(default)]
    pub user_permissions_change: Vec<GarminPermissionChange>,
}
