//! Typed access to the dispatch collections
//!
//! Handlers and services never touch raw documents: every read decodes
//! into the schema structs here, and a document that does not decode is
//! surfaced as a `Decode` error rather than patched around.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::store::{Document, DocumentStore, Filter, OrderBy};
use crate::types::{
    BatchStatus, Delivery, DeliveryBatch, DeliveryStatus, Driver, DriverStatus, Shipment,
};

pub const DRIVERS: &str = "drivers";
pub const DELIVERIES: &str = "deliveries";
pub const BATCHES: &str = "batches";
pub const SHIPMENTS: &str = "shipments";

fn decode<T: DeserializeOwned>(
    collection: &'static str,
    doc: Document,
) -> Result<T, DispatchError> {
    serde_json::from_value(doc.data).map_err(|source| DispatchError::Decode {
        collection,
        id: doc.id,
        source,
    })
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value, DispatchError> {
    Ok(serde_json::to_value(value)?)
}

// ── drivers ──

pub async fn get_driver(docs: &dyn DocumentStore, id: Uuid) -> Result<Driver, DispatchError> {
    let doc = docs
        .get(DRIVERS, &id.to_string())
        .await?
        .ok_or_else(|| DispatchError::not_found("driver", id))?;
    decode(DRIVERS, doc)
}

pub async fn put_driver(docs: &dyn DocumentStore, driver: &Driver) -> Result<(), DispatchError> {
    docs.put(DRIVERS, &driver.id.to_string(), encode(driver)?)
        .await?;
    Ok(())
}

/// Drivers that can take work in a zone right now: online, available and
/// serving the zone. Capacity is the caller's concern.
pub async fn available_drivers_in_zone(
    docs: &dyn DocumentStore,
    zone: &str,
) -> Result<Vec<Driver>, DispatchError> {
    let filters = [
        Filter::eq("status", DriverStatus::Online.as_str()),
        Filter::eq("isAvailable", true),
        Filter::array_contains("serviceZones", zone),
    ];
    let results = docs.query(DRIVERS, &filters, None, None).await?;
    results
        .into_iter()
        .map(|doc| decode(DRIVERS, doc))
        .collect()
}

// ── deliveries ──

pub async fn get_delivery(docs: &dyn DocumentStore, id: Uuid) -> Result<Delivery, DispatchError> {
    let doc = docs
        .get(DELIVERIES, &id.to_string())
        .await?
        .ok_or_else(|| DispatchError::not_found("delivery", id))?;
    decode(DELIVERIES, doc)
}

pub async fn put_delivery(
    docs: &dyn DocumentStore,
    delivery: &Delivery,
) -> Result<(), DispatchError> {
    docs.put(DELIVERIES, &delivery.id.to_string(), encode(delivery)?)
        .await?;
    Ok(())
}

/// Pending deliveries in a zone, oldest first.
pub async fn pending_deliveries_in_zone(
    docs: &dyn DocumentStore,
    zone: &str,
    limit: Option<usize>,
) -> Result<Vec<Delivery>, DispatchError> {
    let filters = [
        Filter::eq("status", DeliveryStatus::Pending.as_str()),
        Filter::eq("zone", zone),
    ];
    let results = docs
        .query(DELIVERIES, &filters, Some(&OrderBy::asc("createdAt")), limit)
        .await?;
    results
        .into_iter()
        .map(|doc| decode(DELIVERIES, doc))
        .collect()
}

// ── batches ──

pub async fn get_batch(docs: &dyn DocumentStore, id: Uuid) -> Result<DeliveryBatch, DispatchError> {
    let doc = docs
        .get(BATCHES, &id.to_string())
        .await?
        .ok_or_else(|| DispatchError::not_found("batch", id))?;
    decode(BATCHES, doc)
}

pub async fn put_batch(docs: &dyn DocumentStore, batch: &DeliveryBatch) -> Result<(), DispatchError> {
    docs.put(BATCHES, &batch.id.to_string(), encode(batch)?)
        .await?;
    Ok(())
}

/// The driver's batch still in flight, if any. A driver owns at most one.
pub async fn active_batch_for_driver(
    docs: &dyn DocumentStore,
    driver_id: Uuid,
) -> Result<Option<DeliveryBatch>, DispatchError> {
    let filters = [
        Filter::eq("driverId", driver_id.to_string()),
        Filter::is_in(
            "status",
            vec![
                BatchStatus::Pending.as_str().into(),
                BatchStatus::Active.as_str().into(),
            ],
        ),
    ];
    let mut results = docs.query(BATCHES, &filters, None, Some(1)).await?;
    match results.pop() {
        Some(doc) => Ok(Some(decode(BATCHES, doc)?)),
        None => Ok(None),
    }
}

// ── shipments ──

pub async fn get_shipment(
    docs: &dyn DocumentStore,
    tracking_id: &str,
) -> Result<Shipment, DispatchError> {
    let doc = docs
        .get(SHIPMENTS, tracking_id)
        .await?
        .ok_or_else(|| DispatchError::not_found("shipment", tracking_id))?;
    decode(SHIPMENTS, doc)
}

pub async fn put_shipment(
    docs: &dyn DocumentStore,
    shipment: &Shipment,
) -> Result<(), DispatchError> {
    docs.put(SHIPMENTS, &shipment.tracking_id, encode(shipment)?)
        .await?;
    Ok(())
}
