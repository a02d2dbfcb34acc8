// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment and read
//! once at startup.

use crate::models::Provider;
use chrono::{Duration, FixedOffset, Offset, Utc};
use std::env;
use std::str::FromStr;

/// Which `TimelineStore` implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// When provider activities require a yes/no confirmation from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// Only same-day (bonus) activities are confirmed.
    BonusOnly,
    /// Every provider activity is confirmed before it counts.
    Always,
}

impl FromStr for ConfirmationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bonus" => Ok(ConfirmationPolicy::BonusOnly),
            "always" => Ok(ConfirmationPolicy::Always),
            _ => Err(ConfigError::Invalid("CONFIRMATION_POLICY")),
        }
    }
}

/// Per-provider noise floor below which activities are dropped.
#[derive(Debug, Clone, Copy)]
pub struct ProviderMinimums {
    pub min_duration_secs: u32,
    pub min_strain: f64,
}

/// Timing and filtering knobs of the accountability engine.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// Days a member may go without a qualifying activity.
    pub deadline_days: i64,
    pub garmin: ProviderMinimums,
    pub whoop: ProviderMinimums,
    /// In-flight lock held per external id while an activity is processed.
    pub lock_ttl: Duration,
    /// How long a parked activity waits for the user's yes/no.
    pub pending_ttl: Duration,
    /// How long a declined activity stays suppressed.
    pub ignored_ttl: Duration,
    /// Slack around a provider activity window when matching manual uploads.
    pub merge_margin: Duration,
    /// Probationary members are not banned this soon after rejoining.
    pub rejoin_grace: Duration,
    /// New members are not checked this soon after joining.
    pub new_member_grace: Duration,
    /// Lead time of the last-day warning.
    pub warning_lead: Duration,
    pub sweep_interval: std::time::Duration,
    pub sync_interval: std::time::Duration,
    pub confirmation: ConfirmationPolicy,
    /// Offset defining where a calendar day starts for streak purposes.
    pub day_offset: FixedOffset,
}

impl EnginePolicy {
    pub fn deadline(&self) -> Duration {
        Duration::days(self.deadline_days)
    }

    pub fn minimums(&self, provider: Provider) -> ProviderMinimums {
        match provider {
            Provider::Garmin => self.garmin,
            Provider::Whoop => self.whoop,
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let offset_minutes: i32 = parse_or("UTC_OFFSET_MINUTES", 0)?;

        Ok(Self {
            deadline_days: parse_or("DEADLINE_DAYS", defaults.deadline_days)?,
            garmin: ProviderMinimums {
                min_duration_secs: parse_or(
                    "GARMIN_MIN_DURATION_SECS",
                    defaults.garmin.min_duration_secs,
                )?,
                min_strain: parse_or("GARMIN_MIN_STRAIN", defaults.garmin.min_strain)?,
            },
            whoop: ProviderMinimums {
                min_duration_secs: parse_or(
                    "WHOOP_MIN_DURATION_SECS",
                    defaults.whoop.min_duration_secs,
                )?,
                min_strain: parse_or("WHOOP_MIN_STRAIN", defaults.whoop.min_strain)?,
            },
            lock_ttl: Duration::seconds(parse_or("LOCK_TTL_SECS", 30)?),
            pending_ttl: Duration::seconds(parse_or("PENDING_TTL_SECS", 24 * 3600)?),
            ignored_ttl: Duration::seconds(parse_or("IGNORED_TTL_SECS", 14 * 24 * 3600)?),
            merge_margin: Duration::minutes(parse_or("MERGE_MARGIN_MINUTES", 60)?),
            rejoin_grace: Duration::minutes(parse_or("REJOIN_GRACE_MINUTES", 60)?),
            new_member_grace: Duration::hours(parse_or("NEW_MEMBER_GRACE_HOURS", 24)?),
            warning_lead: Duration::hours(parse_or("WARNING_LEAD_HOURS", 24)?),
            sweep_interval: std::time::Duration::from_secs(parse_or("SWEEP_INTERVAL_SECS", 3600)?),
            sync_interval: std::time::Duration::from_secs(parse_or("SYNC_INTERVAL_SECS", 900)?),
            confirmation: match env::var("CONFIRMATION_POLICY") {
                Ok(v) => v.parse()?,
                Err(_) => defaults.confirmation,
            },
            day_offset: FixedOffset::east_opt(offset_minutes * 60)
                .ok_or(ConfigError::Invalid("UTC_OFFSET_MINUTES"))?,
        })
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            deadline_days: 5,
            garmin: ProviderMinimums {
                min_duration_secs: 15 * 60,
                min_strain: 0.0,
            },
            whoop: ProviderMinimums {
                min_duration_secs: 15 * 60,
                min_strain: 4.0,
            },
            lock_ttl: Duration::seconds(30),
            pending_ttl: Duration::hours(24),
            ignored_ttl: Duration::days(14),
            merge_margin: Duration::minutes(60),
            rejoin_grace: Duration::minutes(60),
            new_member_grace: Duration::hours(24),
            warning_lead: Duration::hours(24),
            sweep_interval: std::time::Duration::from_secs(3600),
            sync_interval: std::time::Duration::from_secs(900),
            confirmation: ConfirmationPolicy::BonusOnly,
            day_offset: Utc.fix(),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    pub store_backend: StoreBackend,
    /// Signing key for service tokens used by the chat bot and admins
    pub jwt_signing_key: Vec<u8>,
    pub garmin_client_id: String,
    pub garmin_client_secret: String,
    pub whoop_client_id: String,
    /// Also the key of the Whoop webhook signature
    pub whoop_client_secret: String,
    /// Base URL of the chat bridge; messages are only logged when unset
    pub chat_bridge_url: Option<String>,
    pub policy: EnginePolicy,
}

impl Config {
    /// Config for tests: in-memory store and default policy.
    pub fn test_default() -> Self {
        Self {
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            garmin_client_id: "garmin_test_id".to_string(),
            garmin_client_secret: "garmin_test_secret".to_string(),
            whoop_client_id: "whoop_test_id".to_string(),
            whoop_client_secret: "whoop_test_secret".to_string(),
            chat_bridge_url: None,
            policy: EnginePolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("firestore") | Err(_) => StoreBackend::Firestore,
            Ok(_) => return Err(ConfigError::Invalid("STORE_BACKEND")),
        };

        Ok(Self {
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            store_backend,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            garmin_client_id: required("GARMIN_CLIENT_ID")?,
            garmin_client_secret: required("GARMIN_CLIENT_SECRET")?,
            whoop_client_id: required("WHOOP_CLIENT_ID")?,
            whoop_client_secret: required("WHOOP_CLIENT_SECRET")?,
            chat_bridge_url: env::var("CHAT_BRIDGE_URL").ok().filter(|u| !u.trim().is_empty()),
            policy: EnginePolicy::from_env()?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("GARMIN_CLIENT_ID", "garmin_id");
        env::set_var("GARMIN_CLIENT_SECRET", "garmin_secret");
        env::set_var("WHOOP_CLIENT_ID", "whoop_id");
        env::set_var("WHOOP_CLIENT_SECRET", " whoop_secret\n");
        env::set_var("DEADLINE_DAYS", "7");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.garmin_client_id, "garmin_id");
        assert_eq!(config.whoop_client_secret, "whoop_secret");
        assert_eq!(config.port, 8080);
        assert_eq!(config.policy.deadline_days, 7);
        assert_eq!(config.policy.lock_ttl, Duration::seconds(30));

        env::remove_var("DEADLINE_DAYS");
    }

    #[test]
    fn test_confirmation_policy_parse() {
        assert_eq!(
            "bonus".parse::<ConfirmationPolicy>().unwrap(),
            ConfirmationPolicy::BonusOnly
        );
        assert_eq!(
            " Always ".parse::<ConfirmationPolicy>().unwrap(),
            ConfirmationPolicy::Always
        );
        assert!("sometimes".parse::<ConfirmationPolicy>().is_err());
    }

    #[test]
    fn test_policy_minimums_per_provider() {
        let policy = EnginePolicy::default();
        assert_eq!(policy.minimums(Provider::Whoop).min_strain, 4.0);
        assert_eq!(policy.minimums(Provider::Garmin).min_duration_secs, 900);
        assert_eq!(policy.deadline(), Duration::days(5));
    }
}
