//! # storage-adapters
//!
//! Implementations of the [`domains::DocumentStore`] port.
//!
//! - [`MemoryDocumentStore`]: always compiled; process-local, used by tests
//!   and the `memory` backend.
//! - [`SqliteDocumentStore`]: behind the `db-sqlite` feature; one `documents`
//!   table holding every collection.

pub mod memory;
#[cfg(feature = "db-sqlite")]
pub mod sqlite;

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use domains::{merge_fields, Fields, StoreError, Write};
use uuid::Uuid;

pub use memory::MemoryDocumentStore;
#[cfg(feature = "db-sqlite")]
pub use sqlite::SqliteDocumentStore;

const DOCUMENT_ID_LEN: usize = 20;

/// A random 20-character document ID.
pub(crate) fn generate_document_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(DOCUMENT_ID_LEN);
    id
}

/// Contents of `write`'s document after applying it to `current`
/// (`None` is absent). `Update` on an absent document is `NotFound`.
pub(crate) fn apply_write(current: Option<&Fields>, write: &Write) -> Result<Option<Fields>, StoreError> {
    match write {
        Write::Set(_, fields) => Ok(Some(fields.clone())),
        Write::Update(doc, patch) => {
            let mut fields = current.cloned().ok_or_else(|| StoreError::not_found(doc))?;
            merge_fields(&mut fields, patch.clone());
            Ok(Some(fields))
        }
        Write::Delete(_) => Ok(None),
    }
}

/// Wall clock that never hands out the same or an earlier instant twice.
#[derive(Debug)]
pub(crate) struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = Utc::now();
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }
}
