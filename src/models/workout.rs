// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Workout model: one qualifying activity of one user in one group.

use crate::models::{ActivityRecord, Provider};
use crate::time_utils::fixed_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a workout came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Photo upload by the user
    Manual,
    Garmin,
    Whoop,
    /// Placeholder written when an immunity grant is consumed
    Immunity,
    /// Placeholder written when a banned member is readmitted
    Rejoin,
}

impl Source {
    /// Synthetic workouts reset the deadline without real evidence.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Source::Immunity | Source::Rejoin)
    }
}

impl From<Provider> for Source {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Garmin => Source::Garmin,
            Provider::Whoop => Source::Whoop,
        }
    }
}

/// Stored workout record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    /// Workout ID (also used as document ID)
    pub id: String,
    pub user_id: String,
    pub group_id: String,
    /// Activity start for provider evidence, upload time for manual evidence
    #[serde(with = "fixed_millis")]
    pub created_at: DateTime<Utc>,
    pub source: Source,
    /// Provider provenance (also set on a manual workout after a merge)
    pub provider: Option<Provider>,
    pub external_id: Option<String>,
    /// Manual provenance (also set on a provider workout after a merge)
    #[serde(default)]
    pub photo_attached: bool,
    /// Streak snapshot; `None` means "first workout"
    pub streak: Option<u32>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub duration_seconds: u32,
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub avg_hr: f64,
    #[serde(default)]
    pub distance_meters: f64,
    #[serde(default)]
    pub strain: f64,
    #[serde(default)]
    pub sport_name: String,
    pub device_name: Option<String>,
}

impl Workout {
    fn blank(user_id: &str, group_id: &str, created_at: DateTime<Utc>, source: Source) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            group_id: group_id.to_string(),
            created_at,
            source,
            provider: None,
            external_id: None,
            photo_attached: false,
            streak: None,
            cancelled: false,
            duration_seconds: 0,
            calories: 0.0,
            avg_hr: 0.0,
            distance_meters: 0.0,
            strain: 0.0,
            sport_name: String::new(),
            device_name: None,
        }
    }

    /// Workout backed by a photo upload.
    pub fn manual(user_id: &str, group_id: &str, at: DateTime<Utc>) -> Self {
        let mut workout = Self::blank(user_id, group_id, at, Source::Manual);
        workout.photo_attached = true;
        workout
    }

    /// Workout backed by provider evidence. `strain` must already be resolved.
    pub fn from_record(user_id: &str, group_id: &str, record: &ActivityRecord, strain: f64) -> Self {
        let mut workout = Self::blank(user_id, group_id, record.start_time, record.provider.into());
        workout.provider = Some(record.provider);
        workout.external_id = Some(record.external_id.clone());
        workout.duration_seconds = record.duration_seconds;
        workout.calories = record.calories;
        workout.avg_hr = record.avg_hr;
        workout.distance_meters = record.distance_meters;
        workout.strain = strain;
        workout.sport_name = record.sport_name.clone();
        workout.device_name = record.device_name.clone();
        workout
    }

    /// Placeholder that resets the deadline without evidence.
    pub fn synthetic(user_id: &str, group_id: &str, at: DateTime<Utc>, source: Source) -> Self {
        debug_assert!(source.is_synthetic());
        Self::blank(user_id, group_id, at, source)
    }

    /// True for a manual workout that no provider activity has claimed yet.
    pub fn is_unclaimed_manual(&self) -> bool {
        self.source == Source::Manual && self.external_id.is_none() && !self.cancelled
    }

    /// Copy the provider provenance and stats of `record` onto this workout.
    pub fn attach_record(&mut self, record: &ActivityRecord, strain: f64) {
        self.provider = Some(record.provider);
        self.external_id = Some(record.external_id.clone());
        self.duration_seconds = record.duration_seconds;
        self.calories = record.calories;
        self.avg_hr = record.avg_hr;
        self.distance_meters = record.distance_meters;
        self.strain = strain;
        self.sport_name = record.sport_name.clone();
        self.device_name = record.device_name.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> ActivityRecord {
        ActivityRecord {
            provider: Provider::Garmin,
            external_id: "abc".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap(),
            duration_seconds: 1800,
            calories: 300.0,
            avg_hr: 140.0,
            distance_meters: 5000.0,
            sport_name: "running".to_string(),
            device_name: Some("Forerunner 265".to_string()),
            strain: None,
        }
    }

    #[test]
    fn test_merge_keeps_both_markers() {
        let mut workout = Workout::manual("u1", "g1", Utc::now());
        assert!(workout.is_unclaimed_manual());

        workout.attach_record(&record(), 12.1);

        assert!(!workout.is_unclaimed_manual());
        assert!(workout.photo_attached);
        assert_eq!(workout.source, Source::Manual);
        assert_eq!(workout.provider, Some(Provider::Garmin));
        assert_eq!(workout.external_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_from_record_uses_start_time() {
        let r = record();
        let workout = Workout::from_record("u1", "g1", &r, 10.0);
        assert_eq!(workout.created_at, r.start_time);
        assert_eq!(workout.source, Source::Garmin);
        assert!(!workout.photo_attached);
    }
}
