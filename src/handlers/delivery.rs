//! Delivery message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::services::lifecycle::DeliveryService;
use crate::services::pricing;
use crate::store::{collections, DocumentStore};
use crate::types::{
    AcceptDeliveryRequest, AssignDeliveryRequest, CancelDeliveryRequest, CompleteDeliveryRequest,
    CreateDeliveryRequest, DeliveryGroupsResponse, DeliveryIdRequest, DeliveryListResponse,
    ErrorResponse, GroupDeliveriesRequest, MatchDriversRequest, PendingDeliveriesRequest,
    QuoteRequest, RateDeliveryRequest, Request, StartDeliveryRequest, SuccessResponse,
};

/// Handle delivery.quote messages
///
/// Pure computation; nothing is persisted.
pub async fn handle_quote(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.quote message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<QuoteRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let q = request.payload;
        let breakdown = pricing::quote(
            q.distance_km,
            q.weight_kg,
            q.time_window_cost.unwrap_or(0.0),
            q.priority.unwrap_or_default(),
        );
        let response = SuccessResponse::new(request.id, breakdown);
        let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
    }

    Ok(())
}

/// Handle delivery.create messages
pub async fn handle_create(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.create message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<CreateDeliveryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service.create_delivery(request.payload).await {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
                debug!("Created delivery: {}", response.payload.id);
            }
            Err(e) => {
                error!("Failed to create delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.get messages
pub async fn handle_get(
    client: Client,
    mut subscriber: Subscriber,
    docs: Arc<dyn DocumentStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => continue,
        };

        let request: Request<DeliveryIdRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match collections::get_delivery(&*docs, request.payload.id).await {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
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

/// Handle delivery.pending messages
pub async fn handle_pending(
    client: Client,
    mut subscriber: Subscriber,
    docs: Arc<dyn DocumentStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.pending message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<PendingDeliveriesRequest> = match serde_json::from_slice(&msg.payload)
        {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match collections::pending_deliveries_in_zone(
            &*docs,
            &request.payload.zone,
            request.payload.limit,
        )
        .await
        {
            Ok(deliveries) => {
                let response = SuccessResponse::new(
                    request.id,
                    DeliveryListResponse {
                        total: deliveries.len(),
                        deliveries,
                    },
                );
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list pending deliveries: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.match messages
pub async fn handle_match(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.match message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<MatchDriversRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service
            .find_drivers_for(request.payload.delivery_id, request.payload.count)
            .await
        {
            Ok(matches) => {
                let response = SuccessResponse::new(request.id, matches);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to match drivers: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.accept messages
pub async fn handle_accept(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.accept message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<AcceptDeliveryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service
            .accept_delivery(request.payload.driver_id, request.payload.delivery_id)
            .await
        {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to accept delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.start messages
pub async fn handle_start(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.start message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<StartDeliveryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service
            .start_delivery(request.payload.driver_id, request.payload.delivery_id)
            .await
        {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to start delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.complete messages
pub async fn handle_complete(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.complete message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<CompleteDeliveryRequest> = match serde_json::from_slice(&msg.payload)
        {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service.complete_delivery(request.payload).await {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to complete delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.rate messages
pub async fn handle_rate(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.rate message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<RateDeliveryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service.rate_delivery(request.payload).await {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to rate delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.cancel messages
pub async fn handle_cancel(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.cancel message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<CancelDeliveryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service.cancel_delivery(request.payload).await {
            Ok(delivery) => {
                let response = SuccessResponse::new(request.id, delivery);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to cancel delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.assign messages (auto-assign best driver)
pub async fn handle_assign(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.assign message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<AssignDeliveryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service.auto_assign_delivery(request.payload.delivery_id).await {
            // payload is null when nobody is eligible; callers retry later
            Ok(outcome) => {
                let response = SuccessResponse::new(request.id, outcome);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to auto-assign delivery: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle delivery.groups messages
pub async fn handle_groups(
    client: Client,
    mut subscriber: Subscriber,
    service: Arc<DeliveryService>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received delivery.groups message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<GroupDeliveriesRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match service
            .group_nearby_deliveries(&request.payload.zone, request.payload.max_distance_km)
            .await
        {
            Ok(groups) => {
                let response = SuccessResponse::new(request.id, DeliveryGroupsResponse { groups });
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to group deliveries: {}", e);
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
