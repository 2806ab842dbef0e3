//! # Backing Store Port
//!
//! Any document database must implement [`DocumentStore`] to back the forum.
//! The port mirrors a hosted document store: whole-document reads and writes,
//! field merges, auto-IDs, server timestamps, and an atomic batch commit with
//! per-document version preconditions on which transactions are built.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Top-level fields of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// The two collections a thread is spread across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Posts,
    Comments,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Posts => "posts",
            Collection::Comments => "comments",
        }
    }

    /// Singular noun used in `NotFound` errors.
    pub fn kind(self) -> &'static str {
        match self {
            Collection::Posts => "post",
            Collection::Comments => "comment map",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: Collection,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self { collection, id: id.into() }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    /// Strictly increasing per key; never reused, even across delete and re-create.
    pub version: u64,
    pub fields: Fields,
}

impl Snapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

/// Serializes a model into top-level document fields.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Backend(format!(
            "documents must serialize to an object, got {other}"
        ))),
    }
}

/// Merges `patch` onto `fields`, last write wins per top-level field.
pub fn merge_fields(fields: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        fields.insert(key, value);
    }
}

/// A guard checked atomically at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub doc: DocRef,
    /// `Some(v)`: the document must still be at version `v`. `None`: it must not exist.
    pub version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Whole-document overwrite (creates if absent).
    Set(DocRef, Fields),
    /// Field merge onto an existing document.
    Update(DocRef, Fields),
    Delete(DocRef),
}

impl Write {
    pub fn doc(&self) -> &DocRef {
        match self {
            Write::Set(doc, _) | Write::Update(doc, _) | Write::Delete(doc) => doc,
        }
    }
}

/// An all-or-nothing group of writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(mut self, doc: DocRef, version: Option<u64>) -> Self {
        self.preconditions.push(Precondition { doc, version });
        self
    }

    pub fn set(mut self, doc: DocRef, fields: Fields) -> Self {
        self.writes.push(Write::Set(doc, fields));
        self
    }

    pub fn update(mut self, doc: DocRef, fields: Fields) -> Self {
        self.writes.push(Write::Update(doc, fields));
        self
    }

    pub fn delete(mut self, doc: DocRef) -> Self {
        self.writes.push(Write::Delete(doc));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Failures surfaced by a [`DocumentStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{collection}/{id} does not exist")]
    NotFound { collection: Collection, id: String },

    /// A precondition failed; nothing in the batch was applied.
    #[error("{collection}/{id} was modified concurrently")]
    Conflict { collection: Collection, id: String },

    #[error("malformed document: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Connection loss, I/O failure, driver error.
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(doc: &DocRef) -> Self {
        Self::NotFound { collection: doc.collection, id: doc.id.clone() }
    }

    pub fn conflict(doc: &DocRef) -> Self {
        Self::Conflict { collection: doc.collection, id: doc.id.clone() }
    }
}

/// Data persistence contract for posts and comment maps.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a single document. `Ok(None)` when it does not exist.
    async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Every live document of a collection, in no particular order.
    async fn list_documents(&self, collection: Collection) -> Result<Vec<Snapshot>, StoreError>;

    /// Checks all preconditions and applies all writes atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// A fresh identifier for `create_document`-style inserts.
    fn new_document_id(&self) -> String;

    /// Store-assigned clock; strictly increasing across calls.
    fn server_timestamp(&self) -> DateTime<Utc>;

    async fn set_document(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().set(DocRef::new(collection, id), fields))
            .await
    }

    /// Merges `fields` onto an existing document; `NotFound` if it is absent.
    async fn update_document(
        &self,
        collection: Collection,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().update(DocRef::new(collection, id), fields))
            .await
    }

    /// Deleting an absent document is a no-op.
    async fn delete_document(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().delete(DocRef::new(collection, id)))
            .await
    }

    async fn create_document(
        &self,
        collection: Collection,
        fields: Fields,
    ) -> Result<String, StoreError> {
        let doc = DocRef::new(collection, self.new_document_id());
        self.commit(
            WriteBatch::new()
                .expect_version(doc.clone(), None)
                .set(doc.clone(), fields),
        )
        .await?;
        Ok(doc.id)
    }
}
