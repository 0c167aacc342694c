//! NATS message handlers

pub mod delivery;
pub mod driver;
pub mod ping;
pub mod shipment;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::Client;
use chrono::Utc;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::services::lifecycle::DeliveryService;
use crate::services::location::{DeviceGateway, LocationPublisher, WatchOptions};
use crate::services::notify::{create_push_sender, PushSender};
use crate::services::tracking::ShipmentTracker;
use crate::store::{DocumentStore, LiveStore};

/// Start all message handlers
pub async fn start_handlers(
    client: Client,
    docs: Arc<dyn DocumentStore>,
    live: Arc<dyn LiveStore>,
    config: &Config,
) -> Result<()> {
    info!("Starting message handlers...");
    let started_at = Utc::now();

    // Shared collaborators
    let push: Arc<dyn PushSender> = create_push_sender(config.push_api_url.as_deref());
    let gateway = Arc::new(DeviceGateway::new());
    let watch_options = WatchOptions {
        interval: Duration::from_secs(config.location_interval_secs),
        min_distance_m: config.location_min_distance_m,
    };
    let locations = Arc::new(LocationPublisher::new(
        docs.clone(),
        live.clone(),
        gateway.clone(),
        watch_options,
    ));
    let service = Arc::new(DeliveryService::new(
        docs.clone(),
        live.clone(),
        push.clone(),
        gateway.clone(),
        locations,
    ));
    let tracker = Arc::new(ShipmentTracker::new(docs.clone(), live.clone(), push.clone()));
    info!("Dispatch services initialized");

    // Subscribe to all subjects
    let ping_sub = client.subscribe("maysa.ping").await?;

    // Driver subjects
    let driver_register_sub = client.subscribe("maysa.driver.register").await?;
    let driver_status_sub = client.subscribe("maysa.driver.status").await?;
    let driver_location_sub = client.subscribe("maysa.driver.location").await?;
    let driver_available_sub = client.subscribe("maysa.driver.available").await?;

    // Delivery subjects
    let delivery_quote_sub = client.subscribe("maysa.delivery.quote").await?;
    let delivery_create_sub = client.subscribe("maysa.delivery.create").await?;
    let delivery_get_sub = client.subscribe("maysa.delivery.get").await?;
    let delivery_pending_sub = client.subscribe("maysa.delivery.pending").await?;
    let delivery_match_sub = client.subscribe("maysa.delivery.match").await?;
    let delivery_accept_sub = client.subscribe("maysa.delivery.accept").await?;
    let delivery_start_sub = client.subscribe("maysa.delivery.start").await?;
    let delivery_complete_sub = client.subscribe("maysa.delivery.complete").await?;
    let delivery_rate_sub = client.subscribe("maysa.delivery.rate").await?;
    let delivery_cancel_sub = client.subscribe("maysa.delivery.cancel").await?;
    let delivery_assign_sub = client.subscribe("maysa.delivery.assign").await?;
    let delivery_groups_sub = client.subscribe("maysa.delivery.groups").await?;

    // Shipment subjects
    let shipment_create_sub = client.subscribe("maysa.shipment.create").await?;
    let shipment_status_sub = client.subscribe("maysa.shipment.status").await?;
    let shipment_location_sub = client.subscribe("maysa.shipment.location").await?;
    let shipment_get_sub = client.subscribe("maysa.shipment.get").await?;

    info!("Subscribed to NATS subjects");

    // Clone for each handler
    let client_ping = client.clone();
    let client_driver_register = client.clone();
    let client_driver_status = client.clone();
    let client_driver_location = client.clone();
    let client_driver_available = client.clone();
    let client_delivery_quote = client.clone();
    let client_delivery_create = client.clone();
    let client_delivery_get = client.clone();
    let client_delivery_pending = client.clone();
    let client_delivery_match = client.clone();
    let client_delivery_accept = client.clone();
    let client_delivery_start = client.clone();
    let client_delivery_complete = client.clone();
    let client_delivery_rate = client.clone();
    let client_delivery_cancel = client.clone();
    let client_delivery_assign = client.clone();
    let client_delivery_groups = client.clone();
    let client_shipment_create = client.clone();
    let client_shipment_status = client.clone();
    let client_shipment_location = client.clone();
    let client_shipment_get = client.clone();

    let service_driver_register = Arc::clone(&service);
    let service_driver_status = Arc::clone(&service);
    let service_delivery_create = Arc::clone(&service);
    let service_delivery_match = Arc::clone(&service);
    let service_delivery_accept = Arc::clone(&service);
    let service_delivery_start = Arc::clone(&service);
    let service_delivery_complete = Arc::clone(&service);
    let service_delivery_rate = Arc::clone(&service);
    let service_delivery_cancel = Arc::clone(&service);
    let service_delivery_assign = Arc::clone(&service);
    let service_delivery_groups = Arc::clone(&service);

    let tracker_create = Arc::clone(&tracker);
    let tracker_status = Arc::clone(&tracker);
    let tracker_location = Arc::clone(&tracker);
    let tracker_get = Arc::clone(&tracker);

    let docs_driver_available = docs.clone();
    let docs_delivery_get = docs.clone();
    let docs_delivery_pending = docs.clone();

    let gateway_driver_location = Arc::clone(&gateway);

    // Spawn handlers
    let ping_handle =
        tokio::spawn(async move { ping::handle_ping(client_ping, ping_sub, started_at).await });

    let driver_register_handle = tokio::spawn(async move {
        driver::handle_register(client_driver_register, driver_register_sub, service_driver_register).await
    });

    let driver_status_handle = tokio::spawn(async move {
        driver::handle_status(client_driver_status, driver_status_sub, service_driver_status).await
    });

    let driver_location_handle = tokio::spawn(async move {
        driver::handle_location(client_driver_location, driver_location_sub, gateway_driver_location).await
    });

    let driver_available_handle = tokio::spawn(async move {
        driver::handle_available(client_driver_available, driver_available_sub, docs_driver_available).await
    });

    let delivery_quote_handle = tokio::spawn(async move {
        delivery::handle_quote(client_delivery_quote, delivery_quote_sub).await
    });

    let delivery_create_handle = tokio::spawn(async move {
        delivery::handle_create(client_delivery_create, delivery_create_sub, service_delivery_create).await
    });

    let delivery_get_handle = tokio::spawn(async move {
        delivery::handle_get(client_delivery_get, delivery_get_sub, docs_delivery_get).await
    });

    let delivery_pending_handle = tokio::spawn(async move {
        delivery::handle_pending(client_delivery_pending, delivery_pending_sub, docs_delivery_pending).await
    });

    let delivery_match_handle = tokio::spawn(async move {
        delivery::handle_match(client_delivery_match, delivery_match_sub, service_delivery_match).await
    });

    let delivery_accept_handle = tokio::spawn(async move {
        delivery::handle_accept(client_delivery_accept, delivery_accept_sub, service_delivery_accept).await
    });

    let delivery_start_handle = tokio::spawn(async move {
        delivery::handle_start(client_delivery_start, delivery_start_sub, service_delivery_start).await
    });

    let delivery_complete_handle = tokio::spawn(async move {
        delivery::handle_complete(client_delivery_complete, delivery_complete_sub, service_delivery_complete).await
    });

    let delivery_rate_handle = tokio::spawn(async move {
        delivery::handle_rate(client_delivery_rate, delivery_rate_sub, service_delivery_rate).await
    });

    let delivery_cancel_handle = tokio::spawn(async move {
        delivery::handle_cancel(client_delivery_cancel, delivery_cancel_sub, service_delivery_cancel).await
    });

    let delivery_assign_handle = tokio::spawn(async move {
        delivery::handle_assign(client_delivery_assign, delivery_assign_sub, service_delivery_assign).await
    });

    let delivery_groups_handle = tokio::spawn(async move {
        delivery::handle_groups(client_delivery_groups, delivery_groups_sub, service_delivery_groups).await
    });

    let shipment_create_handle = tokio::spawn(async move {
        shipment::handle_create(client_shipment_create, shipment_create_sub, tracker_create).await
    });

    let shipment_status_handle = tokio::spawn(async move {
        shipment::handle_status(client_shipment_status, shipment_status_sub, tracker_status).await
    });

    let shipment_location_handle = tokio::spawn(async move {
        shipment::handle_location(client_shipment_location, shipment_location_sub, tracker_location).await
    });

    let shipment_get_handle = tokio::spawn(async move {
        shipment::handle_get(client_shipment_get, shipment_get_sub, tracker_get).await
    });

    info!("All handlers started, waiting for messages...");

    // Wait for any handler to finish (which means an error occurred)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = driver_register_handle => {
            error!("Driver register handler finished: {:?}", result);
        }
        result = driver_status_handle => {
            error!("Driver status handler finished: {:?}", result);
        }
        result = driver_location_handle => {
            error!("Driver location handler finished: {:?}", result);
        }
        result = driver_available_handle => {
            error!("Driver available handler finished: {:?}", result);
        }
        result = delivery_quote_handle => {
            error!("Delivery quote handler finished: {:?}", result);
        }
        result = delivery_create_handle => {
            error!("Delivery create handler finished: {:?}", result);
        }
        result = delivery_get_handle => {
            error!("Delivery get handler finished: {:?}", result);
        }
        result = delivery_pending_handle => {
            error!("Delivery pending handler finished: {:?}", result);
        }
        result = delivery_match_handle => {
            error!("Delivery match handler finished: {:?}", result);
        }
        result = delivery_accept_handle => {
            error!("Delivery accept handler finished: {:?}", result);
        }
        result = delivery_start_handle => {
            error!("Delivery start handler finished: {:?}", result);
        }
        result = delivery_complete_handle => {
            error!("Delivery complete handler finished: {:?}", result);
        }
        result = delivery_rate_handle => {
            error!("Delivery rate handler finished: {:?}", result);
        }
        result = delivery_cancel_handle => {
            error!("Delivery cancel handler finished: {:?}", result);
        }
        result = delivery_assign_handle => {
            error!("Delivery assign handler finished: {:?}", result);
        }
        result = delivery_groups_handle => {
            error!("Delivery groups handler finished: {:?}", result);
        }
        result = shipment_create_handle => {
            error!("Shipment create handler finished: {:?}", result);
        }
        result = shipment_status_handle => {
            error!("Shipment status handler finished: {:?}", result);
        }
        result = shipment_location_handle => {
            error!("Shipment location handler finished: {:?}", result);
        }
        result = shipment_get_handle => {
            error!("Shipment get handler finished: {:?}", result);
        }
    }

    Ok(())
}
