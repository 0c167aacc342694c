//! In-process store implementations
//!
//! Backing maps are guarded by `parking_lot::RwLock`; change events fan
//! out over a broadcast channel so watchers never block writers. `apply`
//! validates every op before touching anything, holding the write lock
//! for the whole batch, which is what makes it atomic.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    Document, DocumentEvent, DocumentStore, DocumentWatcher, Filter, LiveEvent, LiveStore,
    LiveSubscription, OrderBy, Precondition, SortOrder, StoreError, WriteBatch, WriteOp,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Resolve a dotted field path ("metrics.averageRating") inside a document.
fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality that treats 5 and 5.0 as the same number.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering for numbers and strings; everything else compares equal.
fn value_cmp(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return x.cmp(y);
    }
    Ordering::Equal
}

fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => {
            lookup_path(doc, field).is_some_and(|v| value_eq(v, value))
        }
        Filter::In { field, values } => {
            lookup_path(doc, field).is_some_and(|v| values.iter().any(|w| value_eq(v, w)))
        }
        Filter::ArrayContains { field, value } => lookup_path(doc, field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|item| value_eq(item, value))),
        Filter::Gte { field, value } => {
            lookup_path(doc, field).is_some_and(|v| value_cmp(v, value) != Ordering::Less)
        }
        Filter::Lte { field, value } => {
            lookup_path(doc, field).is_some_and(|v| value_cmp(v, value) != Ordering::Greater)
        }
    }
}

fn merge_patch(target: &mut Value, patch: &Value) -> Result<(), StoreError> {
    let patch_obj = patch
        .as_object()
        .ok_or_else(|| StoreError::Backend("update patch must be a JSON object".to_string()))?;
    let target_obj = target
        .as_object_mut()
        .ok_or_else(|| StoreError::Backend("stored document is not a JSON object".to_string()))?;
    for (key, value) in patch_obj {
        target_obj.insert(key.clone(), value.clone());
    }
    Ok(())
}

pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    events: broadcast::Sender<DocumentEvent>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            collections: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn emit(&self, collection: &str, id: &str, data: &Value) {
        // nobody listening is fine
        let _ = self.events.send(DocumentEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            data: data.clone(),
        });
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read();
        let mut results: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| filters.iter().all(|f| matches_filter(data, f)))
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        if let Some(order) = order_by {
            results.sort_by(|a, b| {
                let missing = Value::Null;
                let va = lookup_path(&a.data, &order.field).unwrap_or(&missing);
                let vb = lookup_path(&b.data, &order.field).unwrap_or(&missing);
                let ord = value_cmp(va, vb);
                match order.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn create(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.put(collection, &id, data).await?;
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        {
            let mut collections = self.collections.write();
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data.clone());
        }
        self.emit(collection, id, &data);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let updated = {
            let mut collections = self.collections.write();
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            merge_patch(doc, &patch)?;
            doc.clone()
        };
        self.emit(collection, id, &updated);
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut staged_events: Vec<(String, String, Value)> = Vec::with_capacity(batch.len());
        {
            let mut collections = self.collections.write();

            // validate everything before the first mutation
            for op in batch.ops() {
                if let WriteOp::Update {
                    collection,
                    id,
                    precondition,
                    ..
                } = op
                {
                    let doc = collections
                        .get(collection)
                        .and_then(|docs| docs.get(id))
                        .ok_or_else(|| StoreError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        })?;
                    if let Some(Precondition::FieldEquals { field, value }) = precondition {
                        let current = lookup_path(doc, field);
                        if !current.is_some_and(|v| value_eq(v, value)) {
                            return Err(StoreError::PreconditionFailed {
                                collection: collection.clone(),
                                id: id.clone(),
                                field: field.clone(),
                            });
                        }
                    }
                }
            }

            for op in batch.ops() {
                match op {
                    WriteOp::Put {
                        collection,
                        id,
                        data,
                    } => {
                        collections
                            .entry(collection.clone())
                            .or_default()
                            .insert(id.clone(), data.clone());
                        staged_events.push((collection.clone(), id.clone(), data.clone()));
                    }
                    WriteOp::Update {
                        collection,
                        id,
                        patch,
                        ..
                    } => {
                        // existence was validated above; a racing delete is
                        // impossible while we hold the write lock
                        let doc = collections
                            .get_mut(collection)
                            .and_then(|docs| docs.get_mut(id))
                            .ok_or_else(|| StoreError::NotFound {
                                collection: collection.clone(),
                                id: id.clone(),
                            })?;
                        merge_patch(doc, patch)?;
                        staged_events.push((collection.clone(), id.clone(), doc.clone()));
                    }
                }
            }
        }

        for (collection, id, data) in staged_events {
            self.emit(&collection, &id, &data);
        }
        Ok(())
    }

    fn watch(&self, collection: &str) -> DocumentWatcher {
        DocumentWatcher::new(collection, self.events.subscribe())
    }
}

pub struct MemoryLiveStore {
    entries: RwLock<BTreeMap<String, Value>>,
    events: broadcast::Sender<LiveEvent>,
}

impl MemoryLiveStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }
}

impl Default for MemoryLiveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveStore for MemoryLiveStore {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(path.to_string(), value.clone());
        let _ = self.events.send(LiveEvent {
            path: path.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.entries.write().remove(path);
        let _ = self.events.send(LiveEvent {
            path: path.to_string(),
            value: None,
        });
        Ok(())
    }

    fn watch(&self, prefix: &str) -> LiveSubscription {
        LiveSubscription::new(prefix, self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── document store ──

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let store = MemoryDocumentStore::new();
        store
            .put("drivers", "d1", json!({"name": "Sami", "status": "online"}))
            .await
            .unwrap();

        let doc = store.get("drivers", "d1").await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "Sami");
        assert!(store.get("drivers", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_assigns_uuid_id() {
        let store = MemoryDocumentStore::new();
        let id = store.create("deliveries", json!({"zone": "tunis"})).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert!(store.get("deliveries", &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_is_shallow_merge() {
        let store = MemoryDocumentStore::new();
        store
            .put("drivers", "d1", json!({"status": "online", "metrics": {"streak": 2}}))
            .await
            .unwrap();
        store
            .update("drivers", "d1", json!({"status": "busy"}))
            .await
            .unwrap();

        let doc = store.get("drivers", "d1").await.unwrap().unwrap();
        assert_eq!(doc.data["status"], "busy");
        // untouched keys survive
        assert_eq!(doc.data["metrics"]["streak"], 2);
    }

    #[tokio::test]
    async fn test_update_missing_document_fails() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("drivers", "ghost", json!({"status": "busy"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_filters_order_and_limit() {
        let store = MemoryDocumentStore::new();
        for (id, zone, rating, zones) in [
            ("a", "tunis", 4.9, vec!["tunis"]),
            ("b", "tunis", 4.2, vec!["tunis", "ariana"]),
            ("c", "sfax", 4.7, vec!["sfax"]),
        ] {
            store
                .put(
                    "drivers",
                    id,
                    json!({"zone": zone, "metrics": {"averageRating": rating}, "serviceZones": zones}),
                )
                .await
                .unwrap();
        }

        let results = store
            .query(
                "drivers",
                &[
                    Filter::eq("zone", "tunis"),
                    Filter::gte("metrics.averageRating", 4.0),
                ],
                Some(&OrderBy::desc("metrics.averageRating")),
                Some(1),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");

        let by_zone = store
            .query(
                "drivers",
                &[Filter::array_contains("serviceZones", "ariana")],
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(by_zone.len(), 1);
        assert_eq!(by_zone[0].id, "b");
    }

    #[tokio::test]
    async fn test_numeric_equality_ignores_integer_float_split() {
        let store = MemoryDocumentStore::new();
        store.put("c", "x", json!({"n": 5})).await.unwrap();

        let hits = store
            .query("c", &[Filter::eq("n", 5.0)], None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_commits_all_ops() {
        let store = MemoryDocumentStore::new();
        store
            .put("deliveries", "del1", json!({"status": "pending"}))
            .await
            .unwrap();

        let batch = WriteBatch::new()
            .update_if(
                "deliveries",
                "del1",
                json!({"status": "assigned"}),
                "status",
                "pending",
            )
            .put("batches", "b1", json!({"status": "active"}));
        store.apply(batch).await.unwrap();

        assert_eq!(
            store.get("deliveries", "del1").await.unwrap().unwrap().data["status"],
            "assigned"
        );
        assert!(store.get("batches", "b1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_precondition_failure_rolls_nothing_in() {
        let store = MemoryDocumentStore::new();
        store
            .put("deliveries", "del1", json!({"status": "assigned"}))
            .await
            .unwrap();

        let batch = WriteBatch::new()
            .update_if(
                "deliveries",
                "del1",
                json!({"status": "assigned", "driverId": "d2"}),
                "status",
                "pending",
            )
            .put("batches", "b1", json!({"status": "active"}));
        let err = store.apply(batch).await.unwrap_err();

        assert!(matches!(err, StoreError::PreconditionFailed { .. }));
        // the batch's put never happened either
        assert!(store.get("batches", "b1").await.unwrap().is_none());
        let doc = store.get("deliveries", "del1").await.unwrap().unwrap();
        assert!(doc.data.get("driverId").is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_only_its_collection() {
        let store = MemoryDocumentStore::new();
        let mut watcher = store.watch("deliveries");

        store.put("drivers", "d1", json!({"a": 1})).await.unwrap();
        store.put("deliveries", "del1", json!({"b": 2})).await.unwrap();

        let event = watcher.recv().await.unwrap();
        assert_eq!(event.collection, "deliveries");
        assert_eq!(event.id, "del1");
    }

    // ── live store ──

    #[tokio::test]
    async fn test_live_set_get_delete() {
        let store = MemoryLiveStore::new();
        store
            .set("driverLocation/d1", json!({"latitude": 36.8}))
            .await
            .unwrap();
        assert!(store.get("driverLocation/d1").await.unwrap().is_some());

        store.delete("driverLocation/d1").await.unwrap();
        assert!(store.get("driverLocation/d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_watch_filters_by_prefix() {
        let store = MemoryLiveStore::new();
        let mut sub = store.watch("tracking/MAY-1");

        store.set("driverLocation/d1", json!(1)).await.unwrap();
        store.set("tracking/MAY-1/status", json!("in_transit")).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.path, "tracking/MAY-1/status");
        assert_eq!(event.value, Some(json!("in_transit")));
    }

    #[tokio::test]
    async fn test_live_delete_emits_tombstone() {
        let store = MemoryLiveStore::new();
        let mut sub = store.watch("driverLocation/d1");

        store.set("driverLocation/d1", json!(1)).await.unwrap();
        store.delete("driverLocation/d1").await.unwrap();

        assert!(sub.recv().await.unwrap().value.is_some());
        assert!(sub.recv().await.unwrap().value.is_none());
    }
}
