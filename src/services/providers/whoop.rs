// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Whoop developer API client, webhook payloads and signature check.

use super::{check_response_json, send_error, TokenRefreshResponse};
use crate::error::AppError;
use crate::models::Provider;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const API_BASE: &str = "https://api.prod.whoop.com/developer/v1";
const TOKEN_URL: &str = "https://api.prod.whoop.com/oauth/oauth2/token";
const WORKOUT_PAGE_SIZE: u32 = 25;
/// Upper bound on pages followed for one listing.
const MAX_WORKOUT_PAGES: usize = 40;

/// Whoop API client.
#[derive(Clone)]
pub struct WhoopClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl WhoopClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: API_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
            client_id,
            client_secret,
        }
    }

    /// Client talking to an API served at `base_url`.
    pub fn with_base_url(client_id: String, client_secret: String, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::new(client_id, client_secret)
        }
    }

    /// Get a single workout by id.
    pub async fn get_workout(&self, access_token: &str, workout_id: i64) -> Result<WhoopWorkout, AppError> {
        let url = format!("{}/activity/workout/{}", self.base_url, workout_id);
        self.get_json(&url, access_token, &[]).await
    }

    /// List workouts that started at or after `since`, following
    /// `next_token` until the listing is exhausted.
    pub async fn list_workouts(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WhoopWorkout>, AppError> {
        let url = format!("{}/activity/workout", self.base_url);
        let mut workouts = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_WORKOUT_PAGES {
            let mut query = vec![
                ("start", since.to_rfc3339()),
                ("limit", WORKOUT_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = next_token.take() {
                query.push(("nextToken", token));
            }

            let page: WhoopPage<WhoopWorkout> = self.get_json(&url, access_token, &query).await?;
            workouts.extend(page.records);

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => return Ok(workouts),
            }
        }

        tracing::warn!(
            pages = MAX_WORKOUT_PAGES,
            workouts = workouts.len(),
            "Whoop workout listing truncated"
        );
        Ok(workouts)
    }

    /// Day strain of the physiological cycle containing `at`.
    pub async fn cycle_strain(
        &self,
        access_token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, AppError> {
        let url = format!("{}/cycle", self.base_url);
        let page: WhoopPage<WhoopCycle> = self
            .get_json(
                &url,
                access_token,
                &[
                    ("start", (at - Duration::days(1)).to_rfc3339()),
                    ("end", (at + Duration::hours(1)).to_rfc3339()),
                ],
            )
            .await?;

        Ok(page
            .records
            .into_iter()
            .filter(|c| c.start <= at && c.end.map_or(true, |end| at <= end))
            .find_map(|c| c.score.and_then(|s| s.strain)))
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
                ("scope", "offline"),
            ])
            .send()
            .await
            .map_err(send_error(Provider::Whoop))?;

        let refreshed: WhoopTokenResponse =
            super::check_token_response(Provider::Whoop, response).await?;
        Ok(TokenRefreshResponse {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token,
            expires_at: Utc::now().timestamp() + refreshed.expires_in,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(send_error(Provider::Whoop))?;

        check_response_json(Provider::Whoop, response).await
    }
}

#[derive(Debug, Deserialize)]
struct WhoopTokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct WhoopPage<T> {
    #[serde(default = "Vec::new")]
    records: Vec<T>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoopCycle {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    score: Option<WhoopCycleScore>,
}

#[derive(Debug, Deserialize)]
struct WhoopCycleScore {
    strain: Option<f64>,
}

/// Workout as returned by the Whoop API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoopWorkout {
    pub id: i64,
    pub user_id: i64,
    pub start: Option<String>,
    pub end: Option<String>,
    pub sport_id: Option<i64>,
    #[serde(default)]
    pub sport_name: Option<String>,
    pub score_state: Option<String>,
    pub score: Option<WhoopScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoopScore {
    pub strain: Option<f64>,
    pub average_heart_rate: Option<f64>,
    pub kilojoule: Option<f64>,
    pub distance_meter: Option<f64>,
}

/// Body of `POST /webhook/whoop`.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoopWebhookEvent {
    pub user_id: i64,
    /// Id of the changed resource
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub trace_id: Option<String>,
}

impl WhoopWebhookEvent {
    pub fn is_workout_update(&self) -> bool {
        self.event_type == "workout.updated"
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Compute `base64(HMAC-SHA256(secret, timestamp || body))`.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC key error: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a webhook signature in constant time.
pub fn verify_signature(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = compute_signature(secret, timestamp, body) else {
        return false;
    };
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.trim().as_bytes()).into()
}
