//! Driver message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::services::lifecycle::DeliveryService;
use crate::services::location::DeviceGateway;
use crate::store::{collections, DocumentStore};
use crate::types::{
    Ack, AvailableDriversRequest, DriverListResponse, DriverLocationPing, DriverStatusRequest,
    ErrorResponse, GeoFix, RegisterDriverRequest, Request, SuccessResponse,
};

/// Handle driver.register messages
pub async fn handle_register(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received driver.register message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<RegisterDriverRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service.register_driver(request.payload).await {
            Ok(driver) => {
                let response = SuccessResponse::new(request.id, driver);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                debug!("Registered driver: {}", response.payload.id);
            }
            Err(e) => {
                error!("Failed to register driver: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle driver.status messages (online/offline toggle)
pub async fn handle_status(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received driver.status message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<DriverStatusRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service
            .set_driver_status(request.payload.driver_id, request.payload.online)
            .await
        {
            Ok(driver) => {
                let response = SuccessResponse::new(request.id, driver);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to change driver status: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle driver.location messages
///
/// Position pings from the driver app feed the device gateway; the
/// location publisher picks them up from there for any active watch.
pub async fn handle_location(
    client: Client,
    mut subscriber: Subscriber,
    gateway: Arc<DeviceGateway>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<DriverLocationPing> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let ping = request.payload;
        let fix = GeoFix {
            latitude: ping.latitude,
            longitude: ping.longitude,
            accuracy_m: ping.accuracy_m,
            heading_deg: ping.heading_deg,
            speed_mps: ping.speed_mps,
            recorded_at: Utc::now(),
        };
        gateway.push(ping.driver_id, fix);

        let response = SuccessResponse::new(request.id, Ack::ok());
        let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
    }

    Ok(())
}

/// Handle driver.available messages
pub async fn handle_available(
    client: Client,
    mut subscriber: Subscriber,
    docs: Arc<dyn DocumentStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received driver.available message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<AvailableDriversRequest> = match serde_json::from_slice(&msg.payload)
        {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match collections::available_drivers_in_zone(&*docs, &request.payload.zone).await {
            Ok(drivers) => {
                let response = SuccessResponse::new(
                    request.id,
                    DriverListResponse {
                        total: drivers.len(),
                        drivers,
                    },
                );
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list available drivers: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
