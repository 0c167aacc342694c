//! Delivery pricing
//!
//! Quotes are additive: flat base, distance beyond the free allowance,
//! weight handling, the chosen time-window surcharge and a priority
//! surcharge expressed as a fraction of the base price. The total is
//! rounded to whole millimes (2 decimals); components are kept raw so
//! the breakdown always sums to the pre-rounding total.

use crate::defaults::{BASE_PRICE, PRICE_FREE_ALLOWANCE, PRICE_PER_KG, PRICE_PER_KM};
use crate::types::{PriceBreakdown, Priority};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Price a delivery leg.
///
/// `time_window_cost` is the surcharge of the window the customer picked,
/// zero when none was picked. Inputs are taken as-is; the checkout layer
/// owns validation.
pub fn quote(
    distance_km: f64,
    weight_kg: f64,
    time_window_cost: f64,
    priority: Priority,
) -> PriceBreakdown {
    let base_price = BASE_PRICE;
    let distance_price = (distance_km * PRICE_PER_KM - PRICE_FREE_ALLOWANCE).max(0.0);
    let weight_price = weight_kg * PRICE_PER_KG;
    let priority_cost = base_price * (priority.multiplier() - 1.0);

    let total = round2(base_price + distance_price + weight_price + time_window_cost + priority_cost);

    PriceBreakdown {
        base_price,
        distance_price,
        weight_price,
        time_window_cost,
        priority_cost,
        total,
    }
}
