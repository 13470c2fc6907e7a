//! Document store contract consumed by the sync engine.
//!
//! The remote store owns every document. The engine only reads snapshots of
//! live queries and issues single-document writes, so the trait stays small:
//! get/set/update/add/delete plus `listen` for ordered live queries.

mod memory;
mod query;

pub use memory::{MemoryStore, WriteHold};
pub use query::{compare_values, field_value};

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};

pub type ListenerId = u64;

/// Items pushed to a listener: a full snapshot, or a transport error.
pub type Delivery = Result<Snapshot>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocPath {
    /// Subcollection nested under this document, e.g. `chats/{id}/messages`.
    pub fn child(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    ArrayContains(String, Value),
    In(String, Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    First(usize),
    /// The last `n` results, still delivered in query order.
    Last(usize),
}

/// Live/one-shot query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub order_by: String,
    pub direction: Direction,
    pub filters: Vec<Filter>,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn new(collection: CollectionPath, order_by: &str, direction: Direction) -> Self {
        Self {
            collection,
            order_by: order_by.to_string(),
            direction,
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        field_value(&self.data, field)
    }

    /// Decodes into a model; the document id is exposed as the `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut data = self.data.clone();
        data.insert("id".into(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data)).map_err(|e| SyncError::Decode {
            path: self.id.clone(),
            message: e.to_string(),
        })
    }
}

/// Full ordered result set of a query at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub documents: Vec<Document>,
    /// Store commit counter the result set was read at. It reflects every
    /// write the store acknowledged up to that version.
    pub version: u64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.documents.iter().map(Document::decode).collect()
    }
}

/// Single-field write operations. Union/remove/increment commute with
/// concurrent writers, unlike overwriting the whole field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(String, Value),
    ArrayUnion(String, Vec<Value>),
    ArrayRemove(String, Vec<Value>),
    Increment(String, i64),
}

pub struct Listener {
    pub id: ListenerId,
    pub rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    async fn query(&self, query: &Query) -> Result<Snapshot>;

    /// Overwrites (or creates) the whole document.
    async fn set(&self, path: &DocPath, data: Value) -> Result<()>;

    /// Applies field operations to an existing document.
    async fn update(&self, path: &DocPath, ops: Vec<FieldOp>) -> Result<()>;

    /// Appends a document with a store-generated id.
    async fn add(&self, collection: &CollectionPath, data: Value) -> Result<String>;

    async fn delete(&self, path: &DocPath) -> Result<()>;

    /// Registers a live query. The current result set is delivered right away.
    fn listen(&self, query: Query) -> Listener;

    /// Detaches a listener. Unknown ids are ignored.
    fn unlisten(&self, id: ListenerId);

    /// Current commit counter. Read after a write is acknowledged, it bounds
    /// the snapshot version that reflects the write.
    fn version(&self) -> u64;
}

/// Converts a model into the object stored for it, minus the `id` field
/// which lives in the document path.
pub fn to_document_data<T: serde::Serialize>(value: &T) -> Result<Value> {
    let mut data = serde_json::to_value(value).map_err(|e| SyncError::Decode {
        path: String::new(),
        message: e.to_string(),
    })?;
    if let Value::Object(map) = &mut data {
        map.remove("id");
    }
    Ok(data)
}
