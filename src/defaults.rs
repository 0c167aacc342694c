//! Platform-wide dispatch constants

/// Fleet average speed used for every ETA and route duration, km/h
pub const AVERAGE_SPEED_KMH: f64 = 30.0;

/// Flat fee charged on every delivery
pub const BASE_PRICE: f64 = 8.0;

/// Per-kilometer rate beyond the free allowance
pub const PRICE_PER_KM: f64 = 1.5;

/// Flat deduction from the distance component; makes the first
/// PRICE_FREE_ALLOWANCE / PRICE_PER_KM kilometers free
pub const PRICE_FREE_ALLOWANCE: f64 = 5.0;

/// Per-kilogram handling rate
pub const PRICE_PER_KG: f64 = 0.5;

/// Default radius when clustering nearby pending deliveries, km
pub const DEFAULT_GROUP_RADIUS_KM: f64 = 5.0;

/// Default number of ranked candidates returned by the driver matcher
pub const DEFAULT_MATCH_COUNT: usize = 5;

/// Driver score bounds after all adjustments
pub const MIN_DRIVER_SCORE: f64 = 0.0;
pub const MAX_DRIVER_SCORE: f64 = 150.0;

/// Location publisher cadence defaults
pub const DEFAULT_LOCATION_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_LOCATION_MIN_DISTANCE_M: f64 = 15.0;

/// Currency shown on quotes when none is configured
pub const DEFAULT_CURRENCY: &str = "TND";
