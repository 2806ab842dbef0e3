//! In-process document store.
//!
//! Documents live in a [`DashMap`] keyed by address. Commits are serialized
//! by a single async lock so precondition checks and writes of one batch are
//! never interleaved with another batch. Deleted documents leave a tombstone
//! carrying their last version, and versions come from one store-wide
//! counter, so a version number is never handed out twice.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domains::{Collection, DocRef, DocumentStore, Fields, Snapshot, StoreError, WriteBatch};
use tokio::sync::Mutex;
use tracing::trace;

use crate::{apply_write, generate_document_id, MonotonicClock};

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    /// `None` for a tombstone.
    fields: Option<Fields>,
}

#[derive(Debug)]
pub struct MemoryDocumentStore {
    docs: DashMap<DocRef, Entry>,
    next_version: AtomicU64,
    commit_lock: Mutex<()>,
    clock: MonotonicClock,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            next_version: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            clock: MonotonicClock::new(),
        }
    }

    fn live(&self, doc: &DocRef) -> Option<(u64, Fields)> {
        let entry = self.docs.get(doc)?;
        entry.fields.clone().map(|fields| (entry.version, fields))
    }

    /// Number of live documents in `collection`.
    pub fn len(&self, collection: Collection) -> usize {
        self.docs
            .iter()
            .filter(|e| e.key().collection == collection && e.value().fields.is_some())
            .count()
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let doc = DocRef::new(collection, id);
        Ok(self.live(&doc).map(|(version, fields)| Snapshot {
            id: doc.id,
            version,
            fields,
        }))
    }

    async fn list_documents(&self, collection: Collection) -> Result<Vec<Snapshot>, StoreError> {
        let mut snapshots: Vec<Snapshot> = self
            .docs
            .iter()
            .filter(|e| e.key().collection == collection)
            .filter_map(|e| {
                let fields = e.value().fields.clone()?;
                Some(Snapshot {
                    id: e.key().id.clone(),
                    version: e.value().version,
                    fields,
                })
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock().await;

        for precondition in &batch.preconditions {
            let current = self.live(&precondition.doc).map(|(version, _)| version);
            if current != precondition.version {
                trace!(doc = %precondition.doc, ?current, expected = ?precondition.version, "precondition failed");
                return Err(StoreError::conflict(&precondition.doc));
            }
        }

        // Stage the whole batch first so a failing write leaves nothing applied.
        let mut staged: BTreeMap<DocRef, Option<Fields>> = BTreeMap::new();
        for write in &batch.writes {
            let doc = write.doc();
            let current = match staged.get(doc) {
                Some(fields) => fields.clone(),
                None => self.live(doc).map(|(_, fields)| fields),
            };
            let next = apply_write(current.as_ref(), write)?;
            staged.insert(doc.clone(), next);
        }

        for (doc, fields) in staged {
            if fields.is_none() && self.live(&doc).is_none() {
                continue;
            }
            let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
            self.docs.insert(doc, Entry { version, fields });
        }
        Ok(())
    }

    fn new_document_id(&self) -> String {
        generate_document_id()
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
