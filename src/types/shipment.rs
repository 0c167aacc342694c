//! Shipment tracking types, keyed by human-readable tracking id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::geo::{GeoFix, Place};

/// Shipment tracking status, the ladder shown on the tracking page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InTransit => "in_transit",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

/// A shipment party (sender or recipient)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

/// Shipment entity
/// The document id in the shipments collection is the tracking id itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub tracking_id: String,
    pub order_id: String,
    pub sender: Party,
    pub recipient: Party,
    pub origin: Place,
    pub destination: Place,
    pub status: ShipmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_location: Option<GeoFix>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a shipment for tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShipmentRequest {
    pub order_id: String,
    pub sender: Party,
    pub recipient: Party,
    pub origin: Place,
    pub destination: Place,
}

/// Request to move a shipment along the status ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShipmentStatusRequest {
    pub tracking_id: String,
    pub status: ShipmentStatus,
    /// Extra fields merged into the shipment document as-is
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// Request to record a position for a shipment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentLocationRequest {
    pub tracking_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// When set, the durable document mirrors the fix as `lastLocation`
    #[serde(default)]
    pub mirror: bool,
}

/// Request referencing a shipment by tracking id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingIdRequest {
    pub tracking_id: String,
}
