//! Shipment tracking bridge
//!
//! The customer-facing side of a delivery, keyed by the human-readable
//! tracking id printed on the label. Status changes are written through
//! to both stores; the durable document is the primary write and the
//! live path plus the sender push are side channels that log their own
//! failures instead of failing the update.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::DispatchError;
use crate::services::notify::{PushMessage, PushSender};
use crate::store::{collections, DocumentStore, LiveStore};
use crate::types::{CreateShipmentRequest, GeoFix, Shipment, ShipmentStatus};

const TRACKING_PREFIX: &str = "MAY-";
const TRACKING_SUFFIX_LEN: usize = 8;

/// Tracking ids look like `MAY-7Q2Z9K1X`: short enough to read out on
/// the phone, random enough to not be guessable in practice.
pub fn generate_tracking_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRACKING_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{TRACKING_PREFIX}{}", suffix.to_uppercase())
}

/// Notification copy per status step
pub fn status_message(status: ShipmentStatus) -> (&'static str, &'static str) {
    match status {
        ShipmentStatus::Pending => (
            "Order received",
            "Your order is registered and waiting for pickup.",
        ),
        ShipmentStatus::InTransit => ("On the move", "Your order is on its way."),
        ShipmentStatus::OutForDelivery => (
            "Out for delivery",
            "Your order is out for delivery and will arrive soon.",
        ),
        ShipmentStatus::Delivered => ("Delivered", "Your order has been delivered. Enjoy!"),
        ShipmentStatus::Cancelled => (
            "Delivery cancelled",
            "Your delivery was cancelled. Contact support for details.",
        ),
    }
}

fn live_status_path(tracking_id: &str) -> String {
    format!("tracking/{tracking_id}/status")
}

fn live_location_path(tracking_id: &str) -> String {
    format!("tracking/{tracking_id}/location")
}

pub struct ShipmentTracker {
    docs: Arc<dyn DocumentStore>,
    live: Arc<dyn LiveStore>,
    push: Arc<dyn PushSender>,
}

impl ShipmentTracker {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        live: Arc<dyn LiveStore>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        Self { docs, live, push }
    }

    pub async fn create_shipment(
        &self,
        req: CreateShipmentRequest,
    ) -> Result<Shipment, DispatchError> {
        let now = Utc::now();
        let shipment = Shipment {
            tracking_id: generate_tracking_id(),
            order_id: req.order_id,
            sender: req.sender,
            recipient: req.recipient,
            origin: req.origin,
            destination: req.destination,
            status: ShipmentStatus::Pending,
            last_location: None,
            created_at: now,
            updated_at: now,
        };
        collections::put_shipment(&*self.docs, &shipment).await?;
        self.write_live_status(&shipment.tracking_id, shipment.status)
            .await;

        info!(tracking_id = %shipment.tracking_id, order_id = %shipment.order_id, "shipment registered");
        Ok(shipment)
    }

    /// Move a shipment along the status ladder. `extra` fields are merged
    /// into the document as-is but can never clobber the status or the
    /// update stamp.
    pub async fn update_status(
        &self,
        tracking_id: &str,
        status: ShipmentStatus,
        extra: Option<Value>,
    ) -> Result<Shipment, DispatchError> {
        let shipment = collections::get_shipment(&*self.docs, tracking_id).await?;

        let mut patch = match extra {
            Some(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        patch.insert("status".to_string(), json!(status));
        patch.insert("updatedAt".to_string(), json!(Utc::now()));
        self.docs
            .update(collections::SHIPMENTS, tracking_id, Value::Object(patch))
            .await?;

        self.write_live_status(tracking_id, status).await;
        self.notify_sender(&shipment, status).await;

        collections::get_shipment(&*self.docs, tracking_id).await
    }

    /// Record a position for a shipment. The live path is the primary
    /// write; the durable mirror is optional and best-effort.
    pub async fn update_location(
        &self,
        tracking_id: &str,
        fix: GeoFix,
        mirror: bool,
    ) -> Result<(), DispatchError> {
        self.live
            .set(&live_location_path(tracking_id), serde_json::to_value(&fix)?)
            .await?;

        if mirror {
            let patch = json!({"lastLocation": fix, "updatedAt": Utc::now()});
            if let Err(error) = self
                .docs
                .update(collections::SHIPMENTS, tracking_id, patch)
                .await
            {
                warn!(tracking_id, %error, "shipment location mirror failed");
            }
        }
        Ok(())
    }

    pub async fn get(&self, tracking_id: &str) -> Result<Shipment, DispatchError> {
        collections::get_shipment(&*self.docs, tracking_id).await
    }

    async fn write_live_status(&self, tracking_id: &str, status: ShipmentStatus) {
        let value = json!({"status": status, "lastUpdate": Utc::now()});
        if let Err(error) = self.live.set(&live_status_path(tracking_id), value).await {
            warn!(tracking_id, %error, "live status write failed");
        }
    }

    async fn notify_sender(&self, shipment: &Shipment, status: ShipmentStatus) {
        let Some(token) = &shipment.sender.device_token else {
            return;
        };
        let (title, body) = status_message(status);
        let msg = PushMessage::new(token, title, body).with_data(json!({
            "trackingId": shipment.tracking_id,
            "status": status,
        }));
        if let Err(error) = self.push.send(msg).await {
            warn!(tracking_id = %shipment.tracking_id, %error, "status push failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notify::FakePushSender;
    use crate::store::{MemoryDocumentStore, MemoryLiveStore};
    use crate::types::{Party, Place};

    fn tracker_with_fake_push() -> (ShipmentTracker, Arc<MemoryDocumentStore>, Arc<MemoryLiveStore>, Arc<FakePushSender>)
    {
        let docs = Arc::new(MemoryDocumentStore::new());
        let live = Arc::new(MemoryLiveStore::new());
        let push = Arc::new(FakePushSender::new());
        let tracker = ShipmentTracker::new(docs.clone(), live.clone(), push.clone());
        (tracker, docs, live, push)
    }

    fn shipment_request(sender_token: Option<&str>) -> CreateShipmentRequest {
        CreateShipmentRequest {
            order_id: "ORD-3310".to_string(),
            sender: Party {
                name: "Maysa Store".to_string(),
                phone: "+216 70 000 000".to_string(),
                device_token: sender_token.map(str::to_string),
            },
            recipient: Party {
                name: "Amira K.".to_string(),
                phone: "+216 22 111 222".to_string(),
                device_token: None,
            },
            origin: Place::new("Depot, Tunis", 36.8065, 10.1815),
            destination: Place::new("La Marsa", 36.8781, 10.3247),
        }
    }

    #[test]
    fn test_tracking_id_shape() {
        let id = generate_tracking_id();
        assert!(id.starts_with("MAY-"));
        assert_eq!(id.len(), 4 + 8);
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric() && !c.is_lowercase()));
    }

    #[tokio::test]
    async fn test_create_persists_and_seeds_live_status() {
        let (tracker, docs, live, _push) = tracker_with_fake_push();

        let shipment = tracker
            .create_shipment(shipment_request(None))
            .await
            .unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Pending);

        let stored = collections::get_shipment(&*docs, &shipment.tracking_id)
            .await
            .unwrap();
        assert_eq!(stored.order_id, "ORD-3310");

        let status = live
            .get(&live_status_path(&shipment.tracking_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status["status"], "pending");
    }

    #[tokio::test]
    async fn test_status_update_writes_both_stores_and_pushes() {
        let (tracker, docs, live, push) = tracker_with_fake_push();
        let shipment = tracker
            .create_shipment(shipment_request(Some("ExponentPushToken[sender]")))
            .await
            .unwrap();

        let updated = tracker
            .update_status(&shipment.tracking_id, ShipmentStatus::OutForDelivery, None)
            .await
            .unwrap();
        assert_eq!(updated.status, ShipmentStatus::OutForDelivery);

        let doc = docs
            .get(collections::SHIPMENTS, &shipment.tracking_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["status"], "out_for_delivery");

        let status = live
            .get(&live_status_path(&shipment.tracking_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status["status"], "out_for_delivery");

        let msg = push.last_message().unwrap();
        assert_eq!(msg.to, "ExponentPushToken[sender]");
        assert_eq!(msg.title, "Out for delivery");
        assert_eq!(
            msg.data.as_ref().unwrap()["trackingId"],
            shipment.tracking_id.as_str()
        );
    }

    #[tokio::test]
    async fn test_push_failure_never_fails_the_update() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let live = Arc::new(MemoryLiveStore::new());
        let push = Arc::new(FakePushSender::failing());
        let tracker = ShipmentTracker::new(docs.clone(), live, push);

        let shipment = tracker
            .create_shipment(shipment_request(Some("token")))
            .await
            .unwrap();
        let updated = tracker
            .update_status(&shipment.tracking_id, ShipmentStatus::Delivered, None)
            .await
            .unwrap();
        assert_eq!(updated.status, ShipmentStatus::Delivered);
    }

    #[tokio::test]
    async fn test_no_token_means_no_push() {
        let (tracker, _docs, _live, push) = tracker_with_fake_push();
        let shipment = tracker
            .create_shipment(shipment_request(None))
            .await
            .unwrap();
        tracker
            .update_status(&shipment.tracking_id, ShipmentStatus::InTransit, None)
            .await
            .unwrap();
        assert!(push.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_extra_fields_merge_without_clobbering_status() {
        let (tracker, docs, _live, _push) = tracker_with_fake_push();
        let shipment = tracker
            .create_shipment(shipment_request(None))
            .await
            .unwrap();

        tracker
            .update_status(
                &shipment.tracking_id,
                ShipmentStatus::InTransit,
                Some(json!({"courierNote": "handed to line-haul", "status": "delivered"})),
            )
            .await
            .unwrap();

        let doc = docs
            .get(collections::SHIPMENTS, &shipment.tracking_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["courierNote"], "handed to line-haul");
        // the requested status wins over anything smuggled in extra
        assert_eq!(doc.data["status"], "in_transit");
    }

    #[tokio::test]
    async fn test_unknown_tracking_id_is_not_found() {
        let (tracker, _docs, _live, _push) = tracker_with_fake_push();
        let err = tracker
            .update_status("MAY-MISSING1", ShipmentStatus::InTransit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { entity: "shipment", .. }));
    }

    #[tokio::test]
    async fn test_location_updates_live_path_with_optional_mirror() {
        let (tracker, docs, live, _push) = tracker_with_fake_push();
        let shipment = tracker
            .create_shipment(shipment_request(None))
            .await
            .unwrap();

        let fix = GeoFix::at(36.84, 10.25, Utc::now());
        tracker
            .update_location(&shipment.tracking_id, fix.clone(), false)
            .await
            .unwrap();

        let live_value = live
            .get(&live_location_path(&shipment.tracking_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live_value["latitude"], 36.84);
        let doc = docs
            .get(collections::SHIPMENTS, &shipment.tracking_id)
            .await
            .unwrap()
            .unwrap();
        assert!(doc.data.get("lastLocation").is_none());

        tracker
            .update_location(&shipment.tracking_id, fix, true)
            .await
            .unwrap();
        let doc = docs
            .get(collections::SHIPMENTS, &shipment.tracking_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["lastLocation"]["latitude"], 36.84);
    }
}
