//! Configuration management

use anyhow::{Context, Result};

use crate::defaults;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Push delivery endpoint (optional; pushes are logged when unset)
    pub push_api_url: Option<String>,

    /// Seconds between forwarded position fixes per tracked driver
    pub location_interval_secs: u64,

    /// Metres a device must move to force a fix through early
    pub location_min_distance_m: f64,

    /// Currency code shown on quotes
    pub currency: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url =
            std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let push_api_url = std::env::var("PUSH_API_URL").ok().filter(|v| !v.is_empty());

        let location_interval_secs = match std::env::var("LOCATION_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse()
                .context("LOCATION_INTERVAL_SECS must be an integer number of seconds")?,
            Err(_) => defaults::DEFAULT_LOCATION_INTERVAL_SECS,
        };

        let location_min_distance_m = match std::env::var("LOCATION_MIN_DISTANCE_M") {
            Ok(raw) => raw
                .parse()
                .context("LOCATION_MIN_DISTANCE_M must be a number of metres")?,
            Err(_) => defaults::DEFAULT_LOCATION_MIN_DISTANCE_M,
        };

        let currency =
            std::env::var("CURRENCY").unwrap_or_else(|_| defaults::DEFAULT_CURRENCY.to_string());

        Ok(Self {
            nats_url,
            push_api_url,
            location_interval_secs,
            location_min_distance_m,
            currency,
        })
    }
}
