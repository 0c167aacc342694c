//! Driver matching
//!
//! Ranks available drivers for a pickup. The store narrows candidates to
//! online, available, zone-serving drivers; capacity and staleness are
//! checked here. Scores start from a flat base and move with rating,
//! punctuality, streak, proximity and how loaded the driver's week
//! already is, clamped to a fixed band so one factor can never swamp
//! the rest. Each match carries the human-readable reasons the driver
//! app shows next to the suggestion.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::{MAX_DRIVER_SCORE, MIN_DRIVER_SCORE};
use crate::error::DispatchError;
use crate::services::geo::{eta_minutes, haversine_km};
use crate::store::{collections, DocumentStore};
use crate::types::{DriverMetrics, GeoPoint};

/// A ranked candidate for a delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverMatch {
    pub driver_id: Uuid,
    pub driver_name: String,
    pub score: f64,
    pub distance_km: f64,
    pub pickup_eta_minutes: u32,
    pub reasons: Vec<String>,
}

/// Composite driver score for a pickup at the given distance.
///
/// 100 base, +10 per rating star, +0.5 per on-time percent, streaks over
/// five earn double their length, minus up to 30 for distance and half a
/// point per delivery already done this week.
pub fn score_driver(metrics: &DriverMetrics, distance_km: f64) -> f64 {
    let mut score = 100.0;
    score += metrics.average_rating * 10.0;
    score += metrics.on_time_rate * 0.5;
    if metrics.current_streak > 5 {
        score += metrics.current_streak as f64 * 2.0;
    }
    score -= (distance_km * 2.0).min(30.0);
    score -= metrics.weekly_deliveries as f64 * 0.5;
    score.clamp(MIN_DRIVER_SCORE, MAX_DRIVER_SCORE)
}

/// Why this driver was suggested, in the order the app displays them
pub fn match_reasons(metrics: &DriverMetrics, distance_km: f64) -> Vec<String> {
    let mut reasons = Vec::new();
    if metrics.average_rating >= 4.5 {
        reasons.push("Excellent rating".to_string());
    }
    if metrics.on_time_rate >= 95.0 {
        reasons.push("High on-time rate".to_string());
    }
    if metrics.current_streak >= 3 {
        reasons.push(format!("{} deliveries in a row", metrics.current_streak));
    }
    if distance_km < 2.0 {
        reasons.push("Very close to pickup".to_string());
    } else if distance_km < 5.0 {
        reasons.push("Nearby".to_string());
    }
    reasons
}

/// Rank the best available drivers for a pickup.
///
/// Candidates without a known current position are skipped; a driver the
/// worker cannot place on the map cannot be routed to a pickup.
pub async fn find_best_drivers(
    docs: &dyn DocumentStore,
    pickup: &GeoPoint,
    zone: &str,
    required_capacity_kg: f64,
    count: usize,
) -> Result<Vec<DriverMatch>, DispatchError> {
    let candidates = collections::available_drivers_in_zone(docs, zone).await?;
    let considered = candidates.len();

    let mut matches: Vec<DriverMatch> = Vec::new();
    for driver in candidates {
        if driver.vehicle.capacity_kg < required_capacity_kg {
            continue;
        }
        let Some(fix) = &driver.current_location else {
            continue;
        };

        let distance_km = haversine_km(&fix.point(), pickup);
        matches.push(DriverMatch {
            driver_id: driver.id,
            driver_name: driver.name.clone(),
            score: score_driver(&driver.metrics, distance_km),
            distance_km,
            pickup_eta_minutes: eta_minutes(distance_km),
            reasons: match_reasons(&driver.metrics, distance_km),
        });
    }

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    matches.truncate(count);

    tracing::debug!(
        zone,
        considered,
        ranked = matches.len(),
        "ranked drivers for pickup"
    );
    Ok(matches)
}
