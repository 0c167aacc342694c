//! Device location seam and live position publishing
//!
//! `LocationProvider` stands in for the driver device's GPS: permission
//! check, one-shot position, and a throttled watch stream. `DeviceGateway`
//! implements it over per-driver channels fed by the driver app's position
//! pings. `LocationPublisher` pumps a watch stream into the stores, with
//! exactly one publisher per context; starting a second replaces the first
//! and stopping is deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::defaults::{DEFAULT_LOCATION_INTERVAL_SECS, DEFAULT_LOCATION_MIN_DISTANCE_M};
use crate::services::geo::haversine_km;
use crate::store::{collections, DocumentStore, LiveStore};
use crate::types::GeoFix;

const FEED_CAPACITY: usize = 64;
const WATCH_CAPACITY: usize = 32;

/// Throttling thresholds for a watch stream: a fix passes once the
/// interval has elapsed or the device moved far enough, whichever first.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub interval: Duration,
    pub min_distance_m: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_LOCATION_INTERVAL_SECS),
            min_distance_m: DEFAULT_LOCATION_MIN_DISTANCE_M,
        }
    }
}

fn should_forward(elapsed: Duration, moved_m: f64, options: &WatchOptions) -> bool {
    elapsed >= options.interval || moved_m >= options.min_distance_m
}

/// A throttled stream of fixes from one device. Drop it or call `stop`
/// to end the stream.
pub struct LocationWatch {
    rx: mpsc::Receiver<GeoFix>,
    stop: CancellationToken,
}

impl LocationWatch {
    pub async fn next(&mut self) -> Option<GeoFix> {
        self.rx.recv().await
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// The device side of live tracking.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Whether the device shares positions at all. A refusal is not an
    /// error; location-dependent features simply stay off.
    async fn request_permission(&self, driver_id: Uuid) -> Result<bool>;

    /// Last known position, if the device ever reported one.
    async fn current_position(&self, driver_id: Uuid) -> Result<Option<GeoFix>>;

    /// Positions as they come in, throttled by `options`.
    fn watch_position(&self, driver_id: Uuid, options: WatchOptions) -> LocationWatch;
}

struct Feed {
    tx: broadcast::Sender<GeoFix>,
    last: Option<GeoFix>,
}

impl Feed {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx, last: None }
    }
}

/// Channel-backed provider fed by the driver app's NATS position pings.
/// A driver whose app never reported a fix has, as far as the worker can
/// tell, not granted location sharing.
#[derive(Default)]
pub struct DeviceGateway {
    feeds: Mutex<HashMap<Uuid, Feed>>,
}

impl DeviceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fix reported by the driver app.
    pub fn push(&self, driver_id: Uuid, fix: GeoFix) {
        let mut feeds = self.feeds.lock();
        let feed = feeds.entry(driver_id).or_insert_with(Feed::new);
        feed.last = Some(fix.clone());
        // no watchers is fine
        let _ = feed.tx.send(fix);
    }
}

#[async_trait]
impl LocationProvider for DeviceGateway {
    async fn request_permission(&self, driver_id: Uuid) -> Result<bool> {
        Ok(self
            .feeds
            .lock()
            .get(&driver_id)
            .is_some_and(|feed| feed.last.is_some()))
    }

    async fn current_position(&self, driver_id: Uuid) -> Result<Option<GeoFix>> {
        Ok(self
            .feeds
            .lock()
            .get(&driver_id)
            .and_then(|feed| feed.last.clone()))
    }

    fn watch_position(&self, driver_id: Uuid, options: WatchOptions) -> LocationWatch {
        let mut feed_rx = {
            let mut feeds = self.feeds.lock();
            feeds.entry(driver_id).or_insert_with(Feed::new).tx.subscribe()
        };

        let (out_tx, out_rx) = mpsc::channel(WATCH_CAPACITY);
        let stop = CancellationToken::new();
        let stopped = stop.clone();

        tokio::spawn(async move {
            let mut last_sent: Option<(GeoFix, Instant)> = None;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    fix = feed_rx.recv() => match fix {
                        Ok(fix) => {
                            let pass = match &last_sent {
                                None => true,
                                Some((prev, at)) => {
                                    let moved_m =
                                        haversine_km(&prev.point(), &fix.point()) * 1000.0;
                                    should_forward(at.elapsed(), moved_m, &options)
                                }
                            };
                            if pass {
                                last_sent = Some((fix.clone(), Instant::now()));
                                if out_tx.send(fix).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        LocationWatch { rx: out_rx, stop }
    }
}

/// Where a publisher mirrors its fixes besides the driver's own path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublishContext {
    Driver(Uuid),
    Delivery(Uuid),
    Tracking(String),
}

impl PublishContext {
    pub fn key(&self) -> String {
        match self {
            Self::Driver(id) => format!("driver/{id}"),
            Self::Delivery(id) => format!("delivery/{id}"),
            Self::Tracking(id) => format!("tracking/{id}"),
        }
    }

    fn mirror_path(&self) -> Option<String> {
        match self {
            Self::Driver(_) => None,
            Self::Delivery(id) => Some(format!("tracking/{id}/location")),
            Self::Tracking(id) => Some(format!("tracking/{id}/location")),
        }
    }
}

/// Pumps device positions into the live store (and the driver document)
/// for as long as a context is being tracked.
pub struct LocationPublisher {
    docs: Arc<dyn DocumentStore>,
    live: Arc<dyn LiveStore>,
    provider: Arc<dyn LocationProvider>,
    options: WatchOptions,
    active: Mutex<HashMap<String, (u64, CancellationToken)>>,
    epoch: AtomicU64,
}

impl LocationPublisher {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        live: Arc<dyn LiveStore>,
        provider: Arc<dyn LocationProvider>,
        options: WatchOptions,
    ) -> Self {
        Self {
            docs,
            live,
            provider,
            options,
            active: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Start publishing for a context. Returns `false` (and starts
    /// nothing) when the device has not granted location sharing. A
    /// publisher already running for the same context is cancelled and
    /// replaced.
    pub async fn start(
        self: &Arc<Self>,
        driver_id: Uuid,
        context: PublishContext,
    ) -> Result<bool> {
        if !self.provider.request_permission(driver_id).await? {
            warn!(%driver_id, context = %context.key(), "location sharing not granted, tracking stays off");
            return Ok(false);
        }

        let key = context.key();
        let token = CancellationToken::new();
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .active
            .lock()
            .insert(key.clone(), (epoch, token.clone()))
        {
            previous.cancel();
        }

        let mut watch = self.provider.watch_position(driver_id, self.options);
        let publisher = Arc::clone(self);
        let task_context = context.clone();
        tokio::spawn(async move {
            debug!(%driver_id, context = %key, "location publisher started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    fix = watch.next() => match fix {
                        Some(fix) => publisher.publish_fix(driver_id, &task_context, fix).await,
                        None => break,
                    }
                }
            }
            watch.stop();
            // only clear the slot if it still belongs to this run
            let mut active = publisher.active.lock();
            if active.get(&key).is_some_and(|(e, _)| *e == epoch) {
                active.remove(&key);
            }
            drop(active);
            debug!(%driver_id, context = %key, "location publisher stopped");
        });

        Ok(true)
    }

    /// Cancel the publisher for a context, if one is running.
    pub fn stop(&self, context: &PublishContext) {
        if let Some((_, token)) = self.active.lock().remove(&context.key()) {
            token.cancel();
        }
    }

    /// Cancel everything; used on worker shutdown.
    pub fn stop_all(&self) {
        for (_, (_, token)) in self.active.lock().drain() {
            token.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    async fn publish_fix(&self, driver_id: Uuid, context: &PublishContext, fix: GeoFix) {
        let value = match serde_json::to_value(&fix) {
            Ok(value) => value,
            Err(error) => {
                warn!(%driver_id, %error, "could not encode fix");
                return;
            }
        };

        if let Err(error) = self
            .live
            .set(&format!("driverLocation/{driver_id}"), value.clone())
            .await
        {
            warn!(%driver_id, %error, "live driver location write failed");
        }
        if let Some(path) = context.mirror_path() {
            if let Err(error) = self.live.set(&path, value).await {
                warn!(%driver_id, path, %error, "live tracking location write failed");
            }
        }

        let patch = json!({
            "currentLocation": fix,
            "lastActive": Utc::now(),
        });
        if let Err(error) = self
            .docs
            .update(collections::DRIVERS, &driver_id.to_string(), patch)
            .await
        {
            warn!(%driver_id, %error, "driver document location update failed");
        }
    }
}
