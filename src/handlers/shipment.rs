//! Shipment tracking message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::services::tracking::ShipmentTracker;
use crate::types::{
    Ack, CreateShipmentRequest, ErrorResponse, GeoFix, Request, ShipmentLocationRequest,
    SuccessResponse, TrackingIdRequest, UpdateShipmentStatusRequest,
};

/// Handle shipment.create messages
pub async fn handle_create(
    client: Client,
    mut subscriber: Subscriber,
    tracker: Arc<ShipmentTracker>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received shipment.create message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<CreateShipmentRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match tracker.create_shipment(request.payload).await {
            Ok(shipment) => {
                let response = SuccessResponse::new(request.id, shipment);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                debug!("Created shipment: {}", response.payload.tracking_id);
            }
            Err(e) => {
                error!("Failed to create shipment: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle shipment.status messages
pub async fn handle_status(
    client: Client,
    mut subscriber: Subscriber,
    tracker: Arc<ShipmentTracker>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received shipment.status message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<UpdateShipmentStatusRequest> =
            match serde_json::from_slice(&msg.payload) {
                Ok(req) => req,
                Err(e) => {
                    error!("Failed to parse request: {}", e);
                    let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
            };

        let payload = request.payload;
        match tracker
            .update_status(&payload.tracking_id, payload.status, payload.extra)
            .await
        {
            Ok(shipment) => {
                let response = SuccessResponse::new(request.id, shipment);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to update shipment status: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle shipment.location messages
pub async fn handle_location(
    client: Client,
    mut subscriber: Subscriber,
    tracker: Arc<ShipmentTracker>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<ShipmentLocationRequest> = match serde_json::from_slice(&msg.payload)
        {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let payload = request.payload;
        let fix = GeoFix::at(payload.latitude, payload.longitude, Utc::now());
        match tracker
            .update_location(&payload.tracking_id, fix, payload.mirror)
            .await
        {
            Ok(()) => {
                let response = SuccessResponse::new(request.id, Ack::ok());
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to record shipment location: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle shipment.get messages
pub async fn handle_get(
    client: Client,
    mut subscriber: Subscriber,
    tracker: Arc<ShipmentTracker>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<TrackingIdRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match tracker.get(&request.payload.tracking_id).await {
            Ok(shipment) => {
                let response = SuccessResponse::new(request.id, shipment);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
