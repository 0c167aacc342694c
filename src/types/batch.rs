//! Delivery batch types: one driver, several deliveries, one optimized route

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::geo::GeoPoint;

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Active,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Whether a stop picks a parcel up or drops it off
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Pickup,
    Dropoff,
}

impl StopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pickup => "pickup",
            Self::Dropoff => "dropoff",
        }
    }
}

/// One stop on a batch route
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub delivery_id: Uuid,
    pub kind: StopKind,
    /// Position in driving order, 0-based
    pub sequence: u32,
    pub point: GeoPoint,
    pub address: String,
}

/// Batch entity
/// Created when a driver accepts a delivery with no batch in flight;
/// `delivery_ids` is append-only until the batch completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryBatch {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub delivery_ids: Vec<Uuid>,
    pub status: BatchStatus,
    pub route: Vec<RouteStop>,
    pub total_distance_km: f64,
    pub estimated_duration_minutes: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
