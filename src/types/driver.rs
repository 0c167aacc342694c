//! Driver types for the dispatch platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::geo::GeoFix;

/// Driver availability status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Offline,
    Online,
    Busy,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Busy => "busy",
        }
    }
}

/// Vehicle category a driver operates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Bicycle,
    Motorcycle,
    Car,
    Van,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bicycle => "bicycle",
            Self::Motorcycle => "motorcycle",
            Self::Car => "car",
            Self::Van => "van",
        }
    }
}

/// Vehicle details
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub vehicle_type: VehicleType,
    pub capacity_kg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}

/// Rolling performance counters embedded in the driver document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverMetrics {
    pub total_deliveries: u32,
    pub completed_deliveries: u32,
    pub cancelled_deliveries: u32,
    /// Percent of deliveries completed on time, 0-100
    pub on_time_rate: f64,
    /// Running customer rating, 1-5
    pub average_rating: f64,
    pub total_earnings: f64,
    pub current_streak: u32,
    pub best_streak: u32,
    pub weekly_deliveries: u32,
    pub monthly_deliveries: u32,
    pub total_distance_km: f64,
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self {
            total_deliveries: 0,
            completed_deliveries: 0,
            cancelled_deliveries: 0,
            on_time_rate: 100.0,
            average_rating: 5.0,
            total_earnings: 0.0,
            current_streak: 0,
            best_streak: 0,
            weekly_deliveries: 0,
            monthly_deliveries: 0,
            total_distance_km: 0.0,
        }
    }
}

/// Driver entity
/// Created on first driver-role activation; never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub vehicle: Vehicle,
    pub service_zones: Vec<String>,
    pub status: DriverStatus,
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<GeoFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_delivery_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_batch_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    pub metrics: DriverMetrics,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Request to register a new driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDriverRequest {
    pub name: String,
    pub phone: String,
    pub photo_url: Option<String>,
    pub vehicle: Vehicle,
    pub service_zones: Vec<String>,
    pub device_token: Option<String>,
}

/// Request to toggle a driver online/offline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatusRequest {
    pub driver_id: Uuid,
    pub online: bool,
}

/// A position ping from the driver app
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationPing {
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
}

/// Request to list available drivers in a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDriversRequest {
    pub zone: String,
}

/// Response for driver listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverListResponse {
    pub drivers: Vec<Driver>,
    pub total: usize,
}
