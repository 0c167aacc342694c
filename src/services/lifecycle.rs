//! Delivery lifecycle
//!
//! `DeliveryService` owns every delivery state transition plus the driver
//! bookkeeping that rides along with it. It is constructed once at startup
//! and injected into the handlers; all collaborators come in as trait
//! handles so tests run against the in-memory stores and fakes.
//!
//! Every multi-document commit goes through the store's atomic batch with
//! a status precondition on the contended document, so two drivers racing
//! for the same delivery resolve to one winner and one `Conflict`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::defaults::{DEFAULT_GROUP_RADIUS_KM, DEFAULT_MATCH_COUNT};
use crate::error::DispatchError;
use crate::services::geo::haversine_km;
use crate::services::location::{LocationProvider, LocationPublisher, PublishContext};
use crate::services::matcher::{self, DriverMatch};
use crate::services::notify::{PushMessage, PushSender};
use crate::services::pricing;
use crate::services::route_optimizer::{optimize_route, OptimizedRoute};
use crate::store::{collections, DocumentStore, LiveStore, WriteBatch};
use crate::types::{
    BatchStatus, CancelDeliveryRequest, CompleteDeliveryRequest, CreateDeliveryRequest, Delivery,
    DeliveryBatch, DeliveryStatus, Driver, DriverStatus, Priority, ProofOfDelivery,
    RateDeliveryRequest, RegisterDriverRequest, RouteStop, StopKind,
};

pub struct DeliveryService {
    docs: Arc<dyn DocumentStore>,
    live: Arc<dyn LiveStore>,
    push: Arc<dyn PushSender>,
    provider: Arc<dyn LocationProvider>,
    locations: Arc<LocationPublisher>,
}

fn stops_for(delivery: &Delivery) -> [RouteStop; 2] {
    [
        RouteStop {
            delivery_id: delivery.id,
            kind: StopKind::Pickup,
            sequence: 0,
            point: delivery.pickup.point,
            address: delivery.pickup.address.clone(),
        },
        RouteStop {
            delivery_id: delivery.id,
            kind: StopKind::Dropoff,
            sequence: 1,
            point: delivery.dropoff.point,
            address: delivery.dropoff.address.clone(),
        },
    ]
}

impl DeliveryService {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        live: Arc<dyn LiveStore>,
        push: Arc<dyn PushSender>,
        provider: Arc<dyn LocationProvider>,
        locations: Arc<LocationPublisher>,
    ) -> Self {
        Self {
            docs,
            live,
            push,
            provider,
            locations,
        }
    }

    // ── deliveries ──

    /// Price an order and persist it as a pending delivery.
    pub async fn create_delivery(
        &self,
        req: CreateDeliveryRequest,
    ) -> Result<Delivery, DispatchError> {
        let distance_km = haversine_km(&req.pickup.point, &req.dropoff.point);
        let priority = req.priority.unwrap_or_default();
        let window_cost = req.time_window.as_ref().map_or(0.0, |w| w.extra_cost);
        let price = pricing::quote(distance_km, req.items.weight_kg, window_cost, priority);

        let delivery = Delivery {
            id: Uuid::new_v4(),
            order_id: req.order_id,
            customer_name: req.customer_name,
            customer_phone: req.customer_phone,
            pickup: req.pickup,
            dropoff: req.dropoff,
            zone: req.zone,
            priority,
            time_window: req.time_window,
            items: req.items,
            price,
            status: DeliveryStatus::Pending,
            driver_id: None,
            batch_id: None,
            created_at: Utc::now(),
            assigned_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            cancel_reason: None,
            rating: None,
            rating_comment: None,
            proof: None,
        };
        collections::put_delivery(&*self.docs, &delivery).await?;

        info!(
            delivery_id = %delivery.id,
            order_id = %delivery.order_id,
            zone = %delivery.zone,
            total = price.total,
            "delivery created"
        );
        Ok(delivery)
    }

    /// A driver takes a pending delivery.
    ///
    /// Joins the driver's batch in flight when there is one, otherwise
    /// opens a new batch. Delivery, batch and driver commit as one write;
    /// the pending-status precondition makes the second of two racing
    /// accepts fail with `Conflict` instead of silently double-assigning.
    pub async fn accept_delivery(
        &self,
        driver_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<Delivery, DispatchError> {
        let delivery = collections::get_delivery(&*self.docs, delivery_id).await?;
        if delivery.status != DeliveryStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "delivery {delivery_id} is not pending"
            )));
        }
        let driver = collections::get_driver(&*self.docs, driver_id).await?;
        let now = Utc::now();

        let (batch, is_new_batch) =
            match collections::active_batch_for_driver(&*self.docs, driver_id).await? {
                Some(mut batch) => {
                    batch.delivery_ids.push(delivery_id);
                    let route = self.batch_route(&batch.delivery_ids).await?;
                    batch.route = route.stops;
                    batch.total_distance_km = route.total_distance_km;
                    batch.estimated_duration_minutes = route.estimated_duration_minutes;
                    (batch, false)
                }
                None => {
                    let route = optimize_route(stops_for(&delivery).to_vec());
                    let batch = DeliveryBatch {
                        id: Uuid::new_v4(),
                        driver_id,
                        delivery_ids: vec![delivery_id],
                        status: BatchStatus::Active,
                        route: route.stops,
                        total_distance_km: route.total_distance_km,
                        estimated_duration_minutes: route.estimated_duration_minutes,
                        created_at: now,
                        completed_at: None,
                    };
                    (batch, true)
                }
            };

        let delivery_patch = json!({
            "status": DeliveryStatus::Assigned,
            "assignedAt": now,
            "driverId": driver_id,
            "batchId": batch.id,
        });
        let driver_patch = json!({
            "status": DriverStatus::Busy,
            "isAvailable": false,
            "currentDeliveryId": delivery_id,
            "currentBatchId": batch.id,
            "lastActive": now,
        });
        let commit = WriteBatch::new()
            .update_if(
                collections::DELIVERIES,
                delivery_id.to_string(),
                delivery_patch,
                "status",
                DeliveryStatus::Pending.as_str(),
            )
            .put(
                collections::BATCHES,
                batch.id.to_string(),
                collections::encode(&batch)?,
            )
            .update_if(
                collections::DRIVERS,
                driver_id.to_string(),
                driver_patch,
                "status",
                driver.status.as_str(),
            );
        self.docs.apply(commit).await?;

        info!(
            %delivery_id,
            %driver_id,
            driver = %driver.name,
            batch_id = %batch.id,
            new_batch = is_new_batch,
            stops = batch.route.len(),
            "delivery accepted"
        );
        collections::get_delivery(&*self.docs, delivery_id).await
    }

    /// Recompute a batch route over all member deliveries' stops.
    async fn batch_route(&self, delivery_ids: &[Uuid]) -> Result<OptimizedRoute, DispatchError> {
        let mut stops = Vec::with_capacity(delivery_ids.len() * 2);
        for id in delivery_ids {
            let member = collections::get_delivery(&*self.docs, *id).await?;
            stops.extend(stops_for(&member));
        }
        Ok(optimize_route(stops))
    }

    /// Driver picked the parcel up; the delivery goes in transit and live
    /// tracking starts. A device that never granted location sharing does
    /// not block the transition.
    pub async fn start_delivery(
        &self,
        driver_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<Delivery, DispatchError> {
        let delivery = collections::get_delivery(&*self.docs, delivery_id).await?;
        if delivery.driver_id != Some(driver_id) {
            return Err(DispatchError::Conflict(format!(
                "delivery {delivery_id} is not assigned to driver {driver_id}"
            )));
        }
        if delivery.status != DeliveryStatus::Assigned {
            return Err(DispatchError::InvalidTransition {
                from: delivery.status.as_str(),
                to: DeliveryStatus::InTransit.as_str(),
            });
        }

        let now = Utc::now();
        self.docs
            .update(
                collections::DELIVERIES,
                &delivery_id.to_string(),
                json!({"status": DeliveryStatus::InTransit, "pickedUpAt": now}),
            )
            .await?;

        if let Err(error) = self
            .locations
            .start(driver_id, PublishContext::Delivery(delivery_id))
            .await
        {
            warn!(%delivery_id, %driver_id, %error, "delivery tracking did not start");
        }

        info!(%delivery_id, %driver_id, "delivery started");
        collections::get_delivery(&*self.docs, delivery_id).await
    }

    /// Driver hands the parcel over: proof is stamped, the driver's
    /// counters move, tracking stops, and the batch closes if this was
    /// its last open delivery.
    pub async fn complete_delivery(
        &self,
        req: CompleteDeliveryRequest,
    ) -> Result<Delivery, DispatchError> {
        let delivery = collections::get_delivery(&*self.docs, req.delivery_id).await?;
        if delivery.driver_id != Some(req.driver_id) {
            return Err(DispatchError::Conflict(format!(
                "delivery {} is not assigned to driver {}",
                req.delivery_id, req.driver_id
            )));
        }
        match delivery.status {
            DeliveryStatus::Assigned | DeliveryStatus::PickedUp | DeliveryStatus::InTransit => {}
            other => {
                return Err(DispatchError::InvalidTransition {
                    from: other.as_str(),
                    to: DeliveryStatus::Delivered.as_str(),
                })
            }
        }

        let driver = collections::get_driver(&*self.docs, req.driver_id).await?;
        let now = Utc::now();
        let proof = ProofOfDelivery {
            photo_url: req.photo_url,
            notes: req.notes,
            location: req.location,
            completed_by: req.driver_id,
            completed_at: now,
        };

        let mut metrics = driver.metrics.clone();
        metrics.total_deliveries += 1;
        metrics.completed_deliveries += 1;
        metrics.weekly_deliveries += 1;
        metrics.monthly_deliveries += 1;
        metrics.current_streak += 1;
        metrics.best_streak = metrics.best_streak.max(metrics.current_streak);
        metrics.total_earnings += delivery.price.total;
        metrics.total_distance_km += haversine_km(&delivery.pickup.point, &delivery.dropoff.point);

        let commit = WriteBatch::new()
            .update_if(
                collections::DELIVERIES,
                req.delivery_id.to_string(),
                json!({"status": DeliveryStatus::Delivered, "deliveredAt": now, "proof": proof}),
                "status",
                delivery.status.as_str(),
            )
            .update(
                collections::DRIVERS,
                req.driver_id.to_string(),
                json!({"metrics": metrics, "lastActive": now}),
            );
        self.docs.apply(commit).await?;

        self.locations
            .stop(&PublishContext::Delivery(req.delivery_id));
        let batch_closed = self
            .check_batch_completion(req.driver_id, req.delivery_id)
            .await?;

        info!(
            delivery_id = %req.delivery_id,
            driver_id = %req.driver_id,
            earnings = delivery.price.total,
            batch_closed,
            "delivery completed"
        );
        collections::get_delivery(&*self.docs, req.delivery_id).await
    }

    /// Close the driver's batch once no member is still in flight, and
    /// hand the driver back to the available pool. Returns whether the
    /// batch was closed.
    pub async fn check_batch_completion(
        &self,
        driver_id: Uuid,
        delivery_id: Uuid,
    ) -> Result<bool, DispatchError> {
        let Some(batch) = collections::active_batch_for_driver(&*self.docs, driver_id).await?
        else {
            return Ok(false);
        };
        if !batch.delivery_ids.contains(&delivery_id) {
            return Ok(false);
        }

        for member_id in &batch.delivery_ids {
            let member = collections::get_delivery(&*self.docs, *member_id).await?;
            if !member.status.is_terminal() {
                return Ok(false);
            }
        }

        let now = Utc::now();
        let commit = WriteBatch::new()
            .update_if(
                collections::BATCHES,
                batch.id.to_string(),
                json!({"status": BatchStatus::Completed, "completedAt": now}),
                "status",
                batch.status.as_str(),
            )
            .update(
                collections::DRIVERS,
                driver_id.to_string(),
                json!({
                    "status": DriverStatus::Online,
                    "isAvailable": true,
                    "currentDeliveryId": null,
                    "currentBatchId": null,
                    "lastActive": now,
                }),
            );
        self.docs.apply(commit).await?;

        info!(batch_id = %batch.id, %driver_id, deliveries = batch.delivery_ids.len(), "batch completed");
        Ok(true)
    }

    /// Customer rates a delivered order; the driver's running average
    /// moves with it, weighted by the prior delivery count.
    pub async fn rate_delivery(&self, req: RateDeliveryRequest) -> Result<Delivery, DispatchError> {
        if !(1..=5).contains(&req.rating) {
            return Err(DispatchError::InvalidRating(req.rating));
        }
        let delivery = collections::get_delivery(&*self.docs, req.delivery_id).await?;
        if delivery.status != DeliveryStatus::Delivered {
            return Err(DispatchError::InvalidTransition {
                from: delivery.status.as_str(),
                to: "rated",
            });
        }

        self.docs
            .update(
                collections::DELIVERIES,
                &req.delivery_id.to_string(),
                json!({"rating": req.rating, "ratingComment": req.comment}),
            )
            .await?;

        if let Some(driver_id) = delivery.driver_id {
            let driver = collections::get_driver(&*self.docs, driver_id).await?;
            let mut metrics = driver.metrics.clone();
            let count = metrics.total_deliveries as f64;
            metrics.average_rating =
                (metrics.average_rating * count + f64::from(req.rating)) / (count + 1.0);
            self.docs
                .update(
                    collections::DRIVERS,
                    &driver_id.to_string(),
                    json!({"metrics": metrics}),
                )
                .await?;
            info!(
                delivery_id = %req.delivery_id,
                %driver_id,
                rating = req.rating,
                average = metrics.average_rating,
                "delivery rated"
            );
        }

        collections::get_delivery(&*self.docs, req.delivery_id).await
    }

    /// Cancel a delivery that has not reached a terminal state. An
    /// assigned driver gets the cancellation on their record, loses the
    /// streak and is released once the batch has nothing left in flight.
    pub async fn cancel_delivery(
        &self,
        req: CancelDeliveryRequest,
    ) -> Result<Delivery, DispatchError> {
        let delivery = collections::get_delivery(&*self.docs, req.delivery_id).await?;
        if delivery.status.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                from: delivery.status.as_str(),
                to: DeliveryStatus::Cancelled.as_str(),
            });
        }

        let now = Utc::now();
        let commit = WriteBatch::new().update_if(
            collections::DELIVERIES,
            req.delivery_id.to_string(),
            json!({"status": DeliveryStatus::Cancelled, "cancelledAt": now, "cancelReason": req.reason}),
            "status",
            delivery.status.as_str(),
        );
        self.docs.apply(commit).await?;

        if let Some(driver_id) = delivery.driver_id {
            let driver = collections::get_driver(&*self.docs, driver_id).await?;
            let mut metrics = driver.metrics.clone();
            metrics.cancelled_deliveries += 1;
            metrics.current_streak = 0;
            self.docs
                .update(
                    collections::DRIVERS,
                    &driver_id.to_string(),
                    json!({"metrics": metrics, "lastActive": now}),
                )
                .await?;

            self.locations
                .stop(&PublishContext::Delivery(req.delivery_id));
            self.check_batch_completion(driver_id, req.delivery_id)
                .await?;
        }

        info!(delivery_id = %req.delivery_id, reason = ?req.reason, "delivery cancelled");
        collections::get_delivery(&*self.docs, req.delivery_id).await
    }

    /// Rank candidates for a delivery without assigning anyone.
    pub async fn find_drivers_for(
        &self,
        delivery_id: Uuid,
        count: Option<usize>,
    ) -> Result<Vec<DriverMatch>, DispatchError> {
        let delivery = collections::get_delivery(&*self.docs, delivery_id).await?;
        matcher::find_best_drivers(
            &*self.docs,
            &delivery.pickup.point,
            &delivery.zone,
            delivery.items.weight_kg,
            count.unwrap_or(DEFAULT_MATCH_COUNT),
        )
        .await
    }

    /// Assign the best available driver, if there is one. `None` means
    /// nobody is eligible right now; dispatch simply tries again later.
    pub async fn auto_assign_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<DriverMatch>, DispatchError> {
        let delivery = collections::get_delivery(&*self.docs, delivery_id).await?;
        if delivery.status != DeliveryStatus::Pending {
            return Err(DispatchError::Conflict(format!(
                "delivery {delivery_id} is not pending"
            )));
        }

        let mut matches = matcher::find_best_drivers(
            &*self.docs,
            &delivery.pickup.point,
            &delivery.zone,
            delivery.items.weight_kg,
            1,
        )
        .await?;
        let Some(best) = matches.pop() else {
            info!(%delivery_id, zone = %delivery.zone, "no eligible driver for auto-assign");
            return Ok(None);
        };

        self.accept_delivery(best.driver_id, delivery_id).await?;
        self.notify_driver_assigned(best.driver_id, delivery_id).await;
        Ok(Some(best))
    }

    async fn notify_driver_assigned(&self, driver_id: Uuid, delivery_id: Uuid) {
        let driver = match collections::get_driver(&*self.docs, driver_id).await {
            Ok(driver) => driver,
            Err(_) => return,
        };
        let Some(token) = &driver.device_token else {
            return;
        };
        let msg = PushMessage::new(token, "New delivery", "A delivery was assigned to you.")
            .with_data(json!({"deliveryId": delivery_id}));
        if let Err(error) = self.push.send(msg).await {
            warn!(%driver_id, %delivery_id, %error, "assignment push failed");
        }
    }

    /// Cluster pending deliveries whose dropoffs share an area, one
    /// greedy pass: each ungrouped delivery seeds a group and pulls in
    /// every later delivery within the radius of the seed's dropoff.
    /// Lone deliveries stay listed only when they are urgent.
    pub async fn group_nearby_deliveries(
        &self,
        zone: &str,
        max_distance_km: Option<f64>,
    ) -> Result<Vec<Vec<Uuid>>, DispatchError> {
        let radius = max_distance_km.unwrap_or(DEFAULT_GROUP_RADIUS_KM);
        let pending = collections::pending_deliveries_in_zone(&*self.docs, zone, None).await?;

        let mut taken = vec![false; pending.len()];
        let mut groups: Vec<Vec<Uuid>> = Vec::new();
        for i in 0..pending.len() {
            if taken[i] {
                continue;
            }
            taken[i] = true;
            let seed = &pending[i];
            let mut group = vec![seed.id];
            for j in (i + 1)..pending.len() {
                if taken[j] {
                    continue;
                }
                // membership is measured against the seed, not chained
                // through earlier members; keeps groups from sprawling
                if haversine_km(&seed.dropoff.point, &pending[j].dropoff.point) <= radius {
                    taken[j] = true;
                    group.push(pending[j].id);
                }
            }
            if group.len() > 1 || seed.priority == Priority::Urgent {
                groups.push(group);
            }
        }

        info!(zone, radius, pending = pending.len(), groups = groups.len(), "grouped nearby deliveries");
        Ok(groups)
    }

    // ── drivers ──

    /// First driver-role activation creates the driver document.
    pub async fn register_driver(
        &self,
        req: RegisterDriverRequest,
    ) -> Result<Driver, DispatchError> {
        let now = Utc::now();
        let driver = Driver {
            id: Uuid::new_v4(),
            name: req.name,
            phone: req.phone,
            photo_url: req.photo_url,
            vehicle: req.vehicle,
            service_zones: req.service_zones,
            status: DriverStatus::Offline,
            is_available: false,
            current_location: None,
            current_delivery_id: None,
            current_batch_id: None,
            device_token: req.device_token,
            metrics: Default::default(),
            created_at: now,
            last_active: now,
        };
        collections::put_driver(&*self.docs, &driver).await?;
        info!(driver_id = %driver.id, name = %driver.name, zones = ?driver.service_zones, "driver registered");
        Ok(driver)
    }

    /// Toggle a driver online or offline. Going online seeds the last
    /// known device position and starts ambient tracking; going offline
    /// stops it. A driver mid-batch cannot toggle either way.
    pub async fn set_driver_status(
        &self,
        driver_id: Uuid,
        online: bool,
    ) -> Result<Driver, DispatchError> {
        let driver = collections::get_driver(&*self.docs, driver_id).await?;
        if driver.status == DriverStatus::Busy {
            return Err(DispatchError::Conflict(format!(
                "driver {driver_id} has deliveries in flight"
            )));
        }

        let now = Utc::now();
        if online {
            let mut patch = json!({
                "status": DriverStatus::Online,
                "isAvailable": true,
                "lastActive": now,
            });
            match self.provider.current_position(driver_id).await {
                Ok(Some(fix)) => {
                    patch["currentLocation"] = serde_json::to_value(&fix)?;
                }
                Ok(None) => {}
                Err(error) => warn!(%driver_id, %error, "device position unavailable"),
            }
            self.docs
                .update(collections::DRIVERS, &driver_id.to_string(), patch)
                .await?;
            self.write_presence(driver_id, DriverStatus::Online).await;

            if let Err(error) = self
                .locations
                .start(driver_id, PublishContext::Driver(driver_id))
                .await
            {
                warn!(%driver_id, %error, "ambient driver tracking did not start");
            }
        } else {
            self.docs
                .update(
                    collections::DRIVERS,
                    &driver_id.to_string(),
                    json!({
                        "status": DriverStatus::Offline,
                        "isAvailable": false,
                        "lastActive": now,
                    }),
                )
                .await?;
            self.write_presence(driver_id, DriverStatus::Offline).await;
            self.locations.stop(&PublishContext::Driver(driver_id));
        }

        info!(%driver_id, online, "driver status changed");
        collections::get_driver(&*self.docs, driver_id).await
    }

    async fn write_presence(&self, driver_id: Uuid, status: DriverStatus) {
        let value = json!({"status": status, "since": Utc::now()});
        if let Err(error) = self
            .live
            .set(&format!("driverStatus/{driver_id}"), value)
            .await
        {
            warn!(%driver_id, %error, "presence write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::location::{DeviceGateway, WatchOptions};
    use crate::services::notify::FakePushSender;
    use crate::store::{MemoryDocumentStore, MemoryLiveStore};
    use crate::types::{GeoFix, ItemsSummary, Place, Vehicle, VehicleType};
    use chrono::TimeZone;

    struct Harness {
        service: DeliveryService,
        docs: Arc<MemoryDocumentStore>,
        live: Arc<MemoryLiveStore>,
        push: Arc<FakePushSender>,
        gateway: Arc<DeviceGateway>,
        locations: Arc<LocationPublisher>,
    }

    fn harness() -> Harness {
        let docs = Arc::new(MemoryDocumentStore::new());
        let live = Arc::new(MemoryLiveStore::new());
        let push = Arc::new(FakePushSender::new());
        let gateway = Arc::new(DeviceGateway::new());
        let locations = Arc::new(LocationPublisher::new(
            docs.clone(),
            live.clone(),
            gateway.clone(),
            WatchOptions::default(),
        ));
        let service = DeliveryService::new(
            docs.clone(),
            live.clone(),
            push.clone(),
            gateway.clone(),
            locations.clone(),
        );
        Harness {
            service,
            docs,
            live,
            push,
            gateway,
            locations,
        }
    }

    fn register_request(zone: &str) -> RegisterDriverRequest {
        RegisterDriverRequest {
            name: "Sami Ben Ali".to_string(),
            phone: "+216 20 000 000".to_string(),
            photo_url: None,
            vehicle: Vehicle {
                vehicle_type: VehicleType::Motorcycle,
                capacity_kg: 15.0,
                plate: Some("123 TN 4567".to_string()),
            },
            service_zones: vec![zone.to_string()],
            device_token: Some("ExponentPushToken[driver]".to_string()),
        }
    }

    /// Register a driver, give the device a position and bring them online.
    async fn online_driver(h: &Harness, zone: &str) -> Driver {
        let driver = h.service.register_driver(register_request(zone)).await.unwrap();
        h.gateway
            .push(driver.id, GeoFix::at(36.8070, 10.1820, Utc::now()));
        h.service.set_driver_status(driver.id, true).await.unwrap()
    }

    fn delivery_request(zone: &str, dropoff: Place) -> CreateDeliveryRequest {
        CreateDeliveryRequest {
            order_id: "ORD-1001".to_string(),
            customer_name: "Amira K.".to_string(),
            customer_phone: "+216 22 111 222".to_string(),
            pickup: Place::new("Depot, Tunis", 36.8065, 10.1815),
            dropoff,
            zone: zone.to_string(),
            priority: None,
            time_window: None,
            items: ItemsSummary {
                count: 1,
                weight_kg: 2.0,
            },
        }
    }

    async fn pending_delivery(h: &Harness, zone: &str) -> Delivery {
        h.service
            .create_delivery(delivery_request(zone, Place::new("La Marsa", 36.8781, 10.3247)))
            .await
            .unwrap()
    }

    // ── create ──

    #[tokio::test]
    async fn test_create_prices_and_persists_pending() {
        let h = harness();
        let delivery = pending_delivery(&h, "tunis-nord").await;

        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.price.base_price, 8.0);
        assert_eq!(delivery.price.weight_price, 1.0);
        assert!(delivery.driver_id.is_none());

        let stored = collections::get_delivery(&*h.docs, delivery.id).await.unwrap();
        assert_eq!(stored.price.total, delivery.price.total);
    }

    // ── accept ──

    #[tokio::test]
    async fn test_first_accept_opens_a_batch() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;

        let accepted = h.service.accept_delivery(driver.id, delivery.id).await.unwrap();
        assert_eq!(accepted.status, DeliveryStatus::Assigned);
        assert_eq!(accepted.driver_id, Some(driver.id));
        assert!(accepted.assigned_at.is_some());

        let batch_id = accepted.batch_id.unwrap();
        let batch = collections::get_batch(&*h.docs, batch_id).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Active);
        assert_eq!(batch.delivery_ids, vec![delivery.id]);
        assert_eq!(batch.route.len(), 2);

        let updated_driver = collections::get_driver(&*h.docs, driver.id).await.unwrap();
        assert_eq!(updated_driver.status, DriverStatus::Busy);
        assert!(!updated_driver.is_available);
        assert_eq!(updated_driver.current_batch_id, Some(batch_id));
    }

    #[tokio::test]
    async fn test_second_accept_joins_the_same_batch() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let first = pending_delivery(&h, "tunis-nord").await;
        let second = h
            .service
            .create_delivery(delivery_request(
                "tunis-nord",
                Place::new("Carthage", 36.8589, 10.3253),
            ))
            .await
            .unwrap();

        let first = h.service.accept_delivery(driver.id, first.id).await.unwrap();
        let second = h.service.accept_delivery(driver.id, second.id).await.unwrap();

        assert_eq!(first.batch_id, second.batch_id);
        let batch = collections::get_batch(&*h.docs, first.batch_id.unwrap())
            .await
            .unwrap();
        assert_eq!(batch.delivery_ids.len(), 2);
        assert_eq!(batch.route.len(), 4);

        // exactly one batch exists for this driver
        let all = h.docs.query(collections::BATCHES, &[], None, None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_losing_accept_gets_a_conflict() {
        let h = harness();
        let winner = online_driver(&h, "tunis-nord").await;
        let loser = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;

        h.service.accept_delivery(winner.id, delivery.id).await.unwrap();
        let err = h
            .service
            .accept_delivery(loser.id, delivery.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    // ── start ──

    #[tokio::test]
    async fn test_start_moves_to_in_transit_and_tracks() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();

        let started = h.service.start_delivery(driver.id, delivery.id).await.unwrap();
        assert_eq!(started.status, DeliveryStatus::InTransit);
        assert!(started.picked_up_at.is_some());

        // ambient driver publisher plus the delivery publisher
        assert_eq!(h.locations.active_count(), 2);
    }

    #[tokio::test]
    async fn test_start_without_location_sharing_still_transitions() {
        let h = harness();
        // driver registered but the device never reported a position
        let driver = h
            .service
            .register_driver(register_request("tunis-nord"))
            .await
            .unwrap();
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();

        let started = h.service.start_delivery(driver.id, delivery.id).await.unwrap();
        assert_eq!(started.status, DeliveryStatus::InTransit);
        assert_eq!(h.locations.active_count(), 0);
    }

    #[tokio::test]
    async fn test_start_guards_driver_and_status() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;

        // not yet accepted
        let err = h
            .service
            .start_delivery(driver.id, delivery.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));

        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();
        let stranger = Uuid::new_v4();
        let err = h
            .service
            .start_delivery(stranger, delivery.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    // ── complete ──

    fn complete_request(delivery_id: Uuid, driver_id: Uuid) -> CompleteDeliveryRequest {
        CompleteDeliveryRequest {
            delivery_id,
            driver_id,
            photo_url: Some("https://cdn.example.test/pod.jpg".to_string()),
            notes: Some("left with concierge".to_string()),
            location: None,
        }
    }

    #[tokio::test]
    async fn test_complete_stamps_proof_and_pays_the_driver() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();
        h.service.start_delivery(driver.id, delivery.id).await.unwrap();

        let done = h
            .service
            .complete_delivery(complete_request(delivery.id, driver.id))
            .await
            .unwrap();
        assert_eq!(done.status, DeliveryStatus::Delivered);
        assert!(done.delivered_at.is_some());
        let proof = done.proof.unwrap();
        assert_eq!(proof.completed_by, driver.id);
        assert_eq!(proof.notes.as_deref(), Some("left with concierge"));

        let updated = collections::get_driver(&*h.docs, driver.id).await.unwrap();
        assert_eq!(updated.metrics.total_deliveries, 1);
        assert_eq!(updated.metrics.completed_deliveries, 1);
        assert_eq!(updated.metrics.current_streak, 1);
        assert_eq!(updated.metrics.best_streak, 1);
        assert_eq!(updated.metrics.weekly_deliveries, 1);
        assert_eq!(updated.metrics.total_earnings, done.price.total);
        assert!(updated.metrics.total_distance_km > 0.0);

        // sole delivery of the batch: driver is released
        assert_eq!(updated.status, DriverStatus::Online);
        assert!(updated.is_available);
        assert!(updated.current_batch_id.is_none());
    }

    #[tokio::test]
    async fn test_batch_stays_open_until_every_member_lands() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let first = pending_delivery(&h, "tunis-nord").await;
        let second = h
            .service
            .create_delivery(delivery_request(
                "tunis-nord",
                Place::new("Carthage", 36.8589, 10.3253),
            ))
            .await
            .unwrap();
        h.service.accept_delivery(driver.id, first.id).await.unwrap();
        h.service.accept_delivery(driver.id, second.id).await.unwrap();

        h.service
            .complete_delivery(complete_request(first.id, driver.id))
            .await
            .unwrap();

        let batch = collections::active_batch_for_driver(&*h.docs, driver.id)
            .await
            .unwrap()
            .expect("batch still open");
        assert_eq!(batch.status, BatchStatus::Active);
        let mid = collections::get_driver(&*h.docs, driver.id).await.unwrap();
        assert_eq!(mid.status, DriverStatus::Busy);

        h.service
            .complete_delivery(complete_request(second.id, driver.id))
            .await
            .unwrap();

        assert!(collections::active_batch_for_driver(&*h.docs, driver.id)
            .await
            .unwrap()
            .is_none());
        let released = collections::get_driver(&*h.docs, driver.id).await.unwrap();
        assert_eq!(released.status, DriverStatus::Online);
        assert!(released.is_available);

        let closed = collections::get_batch(&*h.docs, batch.id).await.unwrap();
        assert_eq!(closed.status, BatchStatus::Completed);
        assert!(closed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_twice_is_an_invalid_transition() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();
        h.service
            .complete_delivery(complete_request(delivery.id, driver.id))
            .await
            .unwrap();

        let err = h
            .service
            .complete_delivery(complete_request(delivery.id, driver.id))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    // ── rate ──

    #[tokio::test]
    async fn test_rating_moves_the_running_average() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();
        h.service
            .complete_delivery(complete_request(delivery.id, driver.id))
            .await
            .unwrap();

        let rated = h
            .service
            .rate_delivery(RateDeliveryRequest {
                delivery_id: delivery.id,
                rating: 3,
                comment: Some("a bit late".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(rated.rating, Some(3));

        // starts at 5.0 with one delivery on the counter: (5*1 + 3) / 2
        let updated = collections::get_driver(&*h.docs, driver.id).await.unwrap();
        assert_eq!(updated.metrics.average_rating, 4.0);
    }

    #[tokio::test]
    async fn test_rating_bounds_and_state_guard() {
        let h = harness();
        let delivery = pending_delivery(&h, "tunis-nord").await;

        let err = h
            .service
            .rate_delivery(RateDeliveryRequest {
                delivery_id: delivery.id,
                rating: 6,
                comment: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRating(6)));

        let err = h
            .service
            .rate_delivery(RateDeliveryRequest {
                delivery_id: delivery.id,
                rating: 4,
                comment: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    // ── cancel ──

    #[tokio::test]
    async fn test_cancel_pending_needs_no_driver() {
        let h = harness();
        let delivery = pending_delivery(&h, "tunis-nord").await;

        let cancelled = h
            .service
            .cancel_delivery(CancelDeliveryRequest {
                delivery_id: delivery.id,
                reason: Some("customer changed their mind".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(
            cancelled.cancel_reason.as_deref(),
            Some("customer changed their mind")
        );
    }

    #[tokio::test]
    async fn test_cancel_assigned_releases_the_driver() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();

        h.service
            .cancel_delivery(CancelDeliveryRequest {
                delivery_id: delivery.id,
                reason: None,
            })
            .await
            .unwrap();

        let updated = collections::get_driver(&*h.docs, driver.id).await.unwrap();
        assert_eq!(updated.metrics.cancelled_deliveries, 1);
        assert_eq!(updated.metrics.current_streak, 0);
        // nothing left in the batch: the driver is back in the pool
        assert_eq!(updated.status, DriverStatus::Online);
        assert!(updated.is_available);
    }

    #[tokio::test]
    async fn test_cancel_after_delivery_is_rejected() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();
        h.service
            .complete_delivery(complete_request(delivery.id, driver.id))
            .await
            .unwrap();

        let err = h
            .service
            .cancel_delivery(CancelDeliveryRequest {
                delivery_id: delivery.id,
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }

    // ── matching & auto-assign ──

    #[tokio::test]
    async fn test_auto_assign_picks_and_notifies_the_best_driver() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;

        let outcome = h.service.auto_assign_delivery(delivery.id).await.unwrap();
        let matched = outcome.expect("a driver was available");
        assert_eq!(matched.driver_id, driver.id);

        let assigned = collections::get_delivery(&*h.docs, delivery.id).await.unwrap();
        assert_eq!(assigned.status, DeliveryStatus::Assigned);
        assert_eq!(assigned.driver_id, Some(driver.id));

        let msg = h.push.last_message().unwrap();
        assert_eq!(msg.to, "ExponentPushToken[driver]");
        assert_eq!(msg.title, "New delivery");
    }

    #[tokio::test]
    async fn test_auto_assign_with_nobody_available_is_none() {
        let h = harness();
        let delivery = pending_delivery(&h, "tunis-nord").await;

        let outcome = h.service.auto_assign_delivery(delivery.id).await.unwrap();
        assert!(outcome.is_none());

        let untouched = collections::get_delivery(&*h.docs, delivery.id).await.unwrap();
        assert_eq!(untouched.status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_find_drivers_respects_capacity() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;

        let mut heavy = delivery_request("tunis-nord", Place::new("La Marsa", 36.8781, 10.3247));
        heavy.items.weight_kg = 50.0; // motorcycle carries 15
        let delivery = h.service.create_delivery(heavy).await.unwrap();

        let matches = h.service.find_drivers_for(delivery.id, None).await.unwrap();
        assert!(matches.is_empty());
        let _ = driver;
    }

    // ── grouping ──

    fn handmade_delivery(
        zone: &str,
        dropoff: Place,
        priority: Priority,
        minute: u32,
    ) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            order_id: format!("ORD-{minute}"),
            customer_name: "Test".to_string(),
            customer_phone: "+216".to_string(),
            pickup: Place::new("Depot, Tunis", 36.8065, 10.1815),
            dropoff,
            zone: zone.to_string(),
            priority,
            time_window: None,
            items: ItemsSummary { count: 1, weight_kg: 1.0 },
            price: pricing::quote(5.0, 1.0, 0.0, priority),
            status: DeliveryStatus::Pending,
            driver_id: None,
            batch_id: None,
            // whole-second stamps keep the store's creation ordering exact
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap(),
            assigned_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
            cancel_reason: None,
            rating: None,
            rating_comment: None,
            proof: None,
        }
    }

    #[tokio::test]
    async fn test_grouping_is_seed_anchored_not_transitive() {
        let h = harness();
        // a 0 km, b ~4.4 km north of a, c ~8.9 km north of a;
        // c is within 5 km of b but not of a
        let a = handmade_delivery("tunis-nord", Place::new("a", 36.80, 10.18), Priority::Normal, 0);
        let b = handmade_delivery("tunis-nord", Place::new("b", 36.84, 10.18), Priority::Normal, 1);
        let c = handmade_delivery("tunis-nord", Place::new("c", 36.88, 10.18), Priority::Urgent, 2);
        for d in [&a, &b, &c] {
            collections::put_delivery(&*h.docs, d).await.unwrap();
        }

        let groups = h
            .service
            .group_nearby_deliveries("tunis-nord", Some(5.0))
            .await
            .unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![a.id, b.id]);
        // c chains off b but the seed is a, so c stands alone; it is kept
        // only because it is urgent
        assert_eq!(groups[1], vec![c.id]);
    }

    #[tokio::test]
    async fn test_normal_singletons_are_dropped() {
        let h = harness();
        let lone = handmade_delivery(
            "tunis-nord",
            Place::new("far", 36.95, 10.30),
            Priority::Normal,
            0,
        );
        collections::put_delivery(&*h.docs, &lone).await.unwrap();

        let groups = h
            .service
            .group_nearby_deliveries("tunis-nord", None)
            .await
            .unwrap();
        assert!(groups.is_empty());
    }

    // ── driver registration & presence ──

    #[tokio::test]
    async fn test_register_driver_starts_offline_with_clean_metrics() {
        let h = harness();
        let driver = h
            .service
            .register_driver(register_request("sfax"))
            .await
            .unwrap();

        assert_eq!(driver.status, DriverStatus::Offline);
        assert!(!driver.is_available);
        assert_eq!(driver.metrics.total_deliveries, 0);
        assert!(collections::get_driver(&*h.docs, driver.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_toggle_updates_presence_and_tracking() {
        let h = harness();
        let driver = h
            .service
            .register_driver(register_request("tunis-nord"))
            .await
            .unwrap();
        h.gateway
            .push(driver.id, GeoFix::at(36.8070, 10.1820, Utc::now()));

        let online = h.service.set_driver_status(driver.id, true).await.unwrap();
        assert_eq!(online.status, DriverStatus::Online);
        assert!(online.is_available);
        // seeded from the device's last fix
        assert!(online.current_location.is_some());
        assert_eq!(h.locations.active_count(), 1);

        let presence = h
            .live
            .get(&format!("driverStatus/{}", driver.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(presence["status"], "online");

        let offline = h.service.set_driver_status(driver.id, false).await.unwrap();
        assert_eq!(offline.status, DriverStatus::Offline);
        assert_eq!(h.locations.active_count(), 0);

        let presence = h
            .live
            .get(&format!("driverStatus/{}", driver.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(presence["status"], "offline");
    }

    #[tokio::test]
    async fn test_busy_driver_cannot_toggle() {
        let h = harness();
        let driver = online_driver(&h, "tunis-nord").await;
        let delivery = pending_delivery(&h, "tunis-nord").await;
        h.service.accept_delivery(driver.id, delivery.id).await.unwrap();

        let err = h
            .service
            .set_driver_status(driver.id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }
}
