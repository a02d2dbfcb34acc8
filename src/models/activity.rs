// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Canonical activity evidence produced by the normalizer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fitness-tracker integrations that deliver activity evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Garmin,
    Whoop,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Garmin => "garmin",
            Provider::Whoop => "whoop",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-independent activity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub provider: Provider,
    /// Normalized id (sub-resource suffixes stripped)
    pub external_id: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u32,
    pub calories: f64,
    pub avg_hr: f64,
    pub distance_meters: f64,
    pub sport_name: String,
    pub device_name: Option<String>,
    /// Strain as reported by the provider, if it reports one
    pub strain: Option<f64>,
}

impl ActivityRecord {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::seconds(i64::from(self.duration_seconds))
    }

    /// Key shared by the lock, pending and ignored entries of this activity.
    pub fn gate_key(&self) -> String {
        format!("{}:{}", self.provider, self.external_id)
    }
}
