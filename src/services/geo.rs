//! Geographic calculations

use crate::defaults::AVERAGE_SPEED_KMH;
use crate::types::GeoPoint;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points in kilometers
pub fn haversine_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Whether `point` lies within `radius_km` of `center`
pub fn is_within_radius(center: &GeoPoint, point: &GeoPoint, radius_km: f64) -> bool {
    haversine_km(center, point) <= radius_km
}

/// Estimated travel time in whole minutes at the fleet average speed,
/// rounded up so short hops never show as zero.
pub fn eta_minutes(distance_km: f64) -> u32 {
    (distance_km / AVERAGE_SPEED_KMH * 60.0).ceil() as u32
}

/// Rider-facing ETA text; anything under five minutes collapses to one label
pub fn eta_label(distance_km: f64) -> String {
    let minutes = eta_minutes(distance_km);
    if minutes < 5 {
        "less than 5 min".to_string()
    } else {
        format!("{} min", minutes)
    }
}

/// Total distance along an ordered path of points
pub fn path_distance_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_km(&pair[0], &pair[1]))
        .sum()
}
