// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Converts provider payloads into `ActivityRecord`s.
//!
//! Partial data is fine: missing numbers become zero. The only hard
//! requirement is an identifiable start time and duration.

use crate::error::{AppError, Result};
use crate::models::{ActivityRecord, Provider};
use crate::services::providers::garmin::GarminActivitySummary;
use crate::services::providers::whoop::WhoopWorkout;
use chrono::{DateTime, Utc};

/// Characters that separate a logical id from a sub-resource suffix
/// (`"abc123-detail"`, `"abc123-file"`).
const ID_SEPARATORS: &[char] = &['-'];

/// Collapse sub-resource variants of a provider id into one logical id.
pub fn normalize_external_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.find(ID_SEPARATORS) {
        Some(pos) => trimmed[..pos].to_string(),
        None => trimmed.to_string(),
    }
}

/// Normalize a Garmin activity summary.
pub fn normalize_garmin(summary: &GarminActivitySummary) -> Result<ActivityRecord> {
    let external_id = normalize_external_id(&summary.summary_id);
    if external_id.is_empty() {
        return Err(AppError::Validation("Garmin summary without id".to_string()));
    }

    let start_secs = summary
        .start_time_in_seconds
        .ok_or_else(|| AppError::Validation(format!("Garmin {} has no start time", external_id)))?;
    let start_time = DateTime::<Utc>::from_timestamp(start_secs, 0).ok_or_else(|| {
        AppError::Validation(format!("Garmin {} start time out of range", external_id))
    })?;
    let duration_seconds = summary
        .duration_in_seconds
        .ok_or_else(|| AppError::Validation(format!("Garmin {} has no duration", external_id)))?;

    Ok(ActivityRecord {
        provider: Provider::Garmin,
        external_id,
        start_time,
        duration_seconds,
        calories: summary.active_kilocalories.unwrap_or(0.0),
        avg_hr: summary.average_heart_rate_in_beats_per_minute.unwrap_or(0.0),
        distance_meters: summary.distance_in_meters.unwrap_or(0.0),
        sport_name: summary
            .activity_type
            .clone()
            .unwrap_or_else(|| "activity".to_string())
            .to_lowercase(),
        device_name: summary.device_name.clone(),
        strain: None,
    })
}

/// Normalize a Whoop workout.
pub fn normalize_whoop(workout: &WhoopWorkout) -> Result<ActivityRecord> {
    let external_id = normalize_external_id(&workout.id.to_string());

    let start_time = parse_time(workout.start.as_deref())
        .ok_or_else(|| AppError::Validation(format!("Whoop {} has no start time", external_id)))?;
    let end_time = parse_time(workout.end.as_deref())
        .ok_or_else(|| AppError::Validation(format!("Whoop {} has no end time", external_id)))?;
    let duration_seconds = u32::try_from((end_time - start_time).num_seconds()).map_err(|_| {
        AppError::Validation(format!("Whoop {} ends before it starts", external_id))
    })?;

    let score = workout.score.as_ref();
    Ok(ActivityRecord {
        provider: Provider::Whoop,
        external_id,
        start_time,
        duration_seconds,
        // Whoop reports kilojoules
        calories: score.and_then(|s| s.kilojoule).unwrap_or(0.0) / 4.184,
        avg_hr: score.and_then(|s| s.average_heart_rate).unwrap_or(0.0),
        distance_meters: score.and_then(|s| s.distance_meter).unwrap_or(0.0),
        sport_name: workout
            .sport_name
            .clone()
            .unwrap_or_else(|| format!("sport {}", workout.sport_id.unwrap_or(-1))),
        device_name: Some("WHOOP".to_string()),
        strain: score.and_then(|s| s.strain),
    })
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
