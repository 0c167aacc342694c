//! Batch route ordering
//!
//! Nearest-neighbor pass over the stops of a batch: the first input stop
//! anchors the route, then each next stop is the closest unvisited one.
//! Good enough for the handful of stops a driver carries at once; the
//! caller gets the reordered stops plus what the reordering saved over
//! driving the input order.

use serde::{Deserialize, Serialize};

use crate::services::geo::{eta_minutes, haversine_km, path_distance_km};
use crate::types::{GeoPoint, RouteStop};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSavings {
    pub distance_km: f64,
    pub minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedRoute {
    pub stops: Vec<RouteStop>,
    pub total_distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub savings: RouteSavings,
}

fn points_of(stops: &[RouteStop]) -> Vec<GeoPoint> {
    stops.iter().map(|s| s.point).collect()
}

fn resequence(stops: &mut [RouteStop]) {
    for (index, stop) in stops.iter_mut().enumerate() {
        stop.sequence = index as u32;
    }
}

/// Order the stops of a batch for driving.
///
/// Routes of two stops or fewer pass through untouched apart from
/// sequencing; there is nothing to reorder.
pub fn optimize_route(mut stops: Vec<RouteStop>) -> OptimizedRoute {
    if stops.len() <= 2 {
        resequence(&mut stops);
        let total_distance_km = path_distance_km(&points_of(&stops));
        return OptimizedRoute {
            estimated_duration_minutes: eta_minutes(total_distance_km),
            total_distance_km,
            stops,
            savings: RouteSavings::default(),
        };
    }

    let naive_distance_km = path_distance_km(&points_of(&stops));

    let mut remaining = stops;
    let mut ordered: Vec<RouteStop> = Vec::with_capacity(remaining.len());
    ordered.push(remaining.remove(0));

    while !remaining.is_empty() {
        let here = ordered[ordered.len() - 1].point;
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (index, candidate) in remaining.iter().enumerate() {
            let d = haversine_km(&here, &candidate.point);
            if d < best_distance {
                best_distance = d;
                best = index;
            }
        }
        ordered.push(remaining.remove(best));
    }

    resequence(&mut ordered);
    let total_distance_km = path_distance_km(&points_of(&ordered));
    let estimated_duration_minutes = eta_minutes(total_distance_km);

    // a well-ordered input can beat nearest-neighbor; savings never go negative
    let distance_saved = (naive_distance_km - total_distance_km).max(0.0);
    let minutes_saved = eta_minutes(naive_distance_km).saturating_sub(estimated_duration_minutes);

    OptimizedRoute {
        stops: ordered,
        total_distance_km,
        estimated_duration_minutes,
        savings: RouteSavings {
            distance_km: distance_saved,
            minutes: minutes_saved,
        },
    }
}
