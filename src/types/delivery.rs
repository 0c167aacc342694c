//! Delivery types for the dispatch platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::geo::{GeoPoint, Place};

/// Delivery lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::PickedUp => "picked_up",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

/// Priority tier chosen at checkout
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Express,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Express => "express",
            Self::Urgent => "urgent",
        }
    }

    /// Surcharge multiplier applied to the base price
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Express => 1.25,
            Self::Urgent => 1.5,
        }
    }
}

/// A delivery time window the customer picked at checkout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub extra_cost: f64,
}

/// Summary of the parcel contents relevant to dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemsSummary {
    pub count: u32,
    pub weight_kg: f64,
}

/// Itemized price quote, stored on the delivery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub base_price: f64,
    pub distance_price: f64,
    pub weight_price: f64,
    pub time_window_cost: f64,
    pub priority_cost: f64,
    pub total: f64,
}

/// Proof captured by the driver at handover
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofOfDelivery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub completed_by: Uuid,
    pub completed_at: DateTime<Utc>,
}

/// Delivery entity
/// Created when a shop order is placed; terminal once delivered or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup: Place,
    pub dropoff: Place,
    pub zone: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    pub items: ItemsSummary,
    pub price: PriceBreakdown,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picked_up_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofOfDelivery>,
}

/// Request for a standalone price quote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub distance_km: f64,
    pub weight_kg: f64,
    #[serde(default)]
    pub time_window_cost: Option<f64>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Request to create a priced, pending delivery from an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeliveryRequest {
    pub order_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup: Place,
    pub dropoff: Place,
    pub zone: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
    pub items: ItemsSummary,
}

/// Request referencing a delivery by id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryIdRequest {
    pub id: Uuid,
}

/// Driver takes a pending delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptDeliveryRequest {
    pub driver_id: Uuid,
    pub delivery_id: Uuid,
}

/// Driver picked the parcel up and is on the way
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDeliveryRequest {
    pub driver_id: Uuid,
    pub delivery_id: Uuid,
}

/// Driver hands the parcel over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteDeliveryRequest {
    pub delivery_id: Uuid,
    pub driver_id: Uuid,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Customer rates a delivered order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDeliveryRequest {
    pub delivery_id: Uuid,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Cancel a delivery that has not reached a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDeliveryRequest {
    pub delivery_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request to list pending deliveries in a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDeliveriesRequest {
    pub zone: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response for delivery listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryListResponse {
    pub deliveries: Vec<Delivery>,
    pub total: usize,
}

/// Request to rank candidate drivers for a delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDriversRequest {
    pub delivery_id: Uuid,
    #[serde(default)]
    pub count: Option<usize>,
}

/// Request to auto-assign the best driver to a delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignDeliveryRequest {
    pub delivery_id: Uuid,
}

/// Request to cluster nearby pending deliveries in a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDeliveriesRequest {
    pub zone: String,
    #[serde(default)]
    pub max_distance_km: Option<f64>,
}

/// Clusters of delivery ids that share a drop area
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryGroupsResponse {
    pub groups: Vec<Vec<Uuid>>,
}
