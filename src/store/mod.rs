//! Store seams for the dispatch worker
//!
//! Two stores back the platform: a durable document store holding the
//! drivers/deliveries/batches/shipments collections, and a low-latency
//! live store holding hierarchical key-paths for positions and presence.
//! Services talk to the traits; `memory` provides the in-process
//! implementations used by the worker and by tests.

pub mod collections;
pub mod memory;

pub use memory::{MemoryDocumentStore, MemoryLiveStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("precondition failed on {collection}/{id}: field {field} changed")]
    PreconditionFailed {
        collection: String,
        id: String,
        field: String,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A stored document: id plus its JSON object payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Query filters, evaluated against (dotted) field paths
#[derive(Debug, Clone)]
pub enum Filter {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    ArrayContains { field: String, value: Value },
    Gte { field: String, value: Value },
    Lte { field: String, value: Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ArrayContains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Guard checked against the stored document before a batched update commits
#[derive(Debug, Clone)]
pub enum Precondition {
    FieldEquals { field: String, value: Value },
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        collection: String,
        id: String,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: Value,
        precondition: Option<Precondition>,
    },
}

/// An atomic multi-document write: every op commits or none does.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, collection: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
        self.ops.push(WriteOp::Put {
            collection: collection.into(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn update(
        mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        patch: Value,
    ) -> Self {
        self.ops.push(WriteOp::Update {
            collection: collection.into(),
            id: id.into(),
            patch,
            precondition: None,
        });
        self
    }

    /// Update that only commits while `field` still equals `value`
    pub fn update_if(
        mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        patch: Value,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ops.push(WriteOp::Update {
            collection: collection.into(),
            id: id.into(),
            patch,
            precondition: Some(Precondition::FieldEquals {
                field: field.into(),
                value: value.into(),
            }),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Change event emitted for every committed document write
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    pub collection: String,
    pub id: String,
    /// Full document payload after the write
    pub data: Value,
}

/// A change subscription scoped to one collection; drop to unsubscribe.
pub struct DocumentWatcher {
    collection: String,
    rx: broadcast::Receiver<DocumentEvent>,
}

impl DocumentWatcher {
    pub fn new(collection: impl Into<String>, rx: broadcast::Receiver<DocumentEvent>) -> Self {
        Self {
            collection: collection.into(),
            rx,
        }
    }

    /// Next event for the watched collection; `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<DocumentEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.collection == self.collection => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(collection = %self.collection, skipped, "document watcher lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Durable document store: collections of JSON documents keyed by id.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Insert with a store-assigned id; returns the new id.
    async fn create(&self, collection: &str, data: Value) -> Result<String, StoreError>;

    /// Insert or replace under a caller-supplied id.
    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    /// Shallow-merge the patch object's top-level keys into an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    /// Commit a multi-document batch atomically, honoring preconditions.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn watch(&self, collection: &str) -> DocumentWatcher;
}

/// Change event from the live store; `value` is `None` for deletes.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub path: String,
    pub value: Option<Value>,
}

/// A live-store subscription scoped to a path prefix; drop to unsubscribe.
pub struct LiveSubscription {
    prefix: String,
    rx: broadcast::Receiver<LiveEvent>,
}

impl LiveSubscription {
    pub fn new(prefix: impl Into<String>, rx: broadcast::Receiver<LiveEvent>) -> Self {
        Self {
            prefix: prefix.into(),
            rx,
        }
    }

    pub async fn recv(&mut self) -> Option<LiveEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.path.starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(prefix = %self.prefix, skipped, "live subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Low-latency key-path store, last-write-wins per path.
#[async_trait]
pub trait LiveStore: Send + Sync {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    fn watch(&self, prefix: &str) -> LiveSubscription;
}
