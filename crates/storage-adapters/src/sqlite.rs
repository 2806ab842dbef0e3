//! # SQLite document store
//!
//! Every collection shares one `documents` table. A row whose `body` is NULL
//! is a tombstone; it keeps the key's version so a re-created document never
//! reuses an old one. Bodies are the JSON text of the document fields.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{Collection, DocRef, DocumentStore, Fields, Snapshot, StoreError, WriteBatch};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{apply_write, generate_document_id, MonotonicClock};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT    NOT NULL,
    id         TEXT    NOT NULL,
    version    INTEGER NOT NULL,
    body       TEXT,
    PRIMARY KEY (collection, id)
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    // Serializes this process's commits; other processes are handled by the
    // busy timeout and surface as `Conflict` if it runs out.
    commit_lock: Mutex<()>,
    clock: MonotonicClock,
}

/// Raw `(version, body)` columns of one row.
type RawRow = (i64, Option<String>);

/// Version plus decoded body; `None` body for a tombstone.
type StoredRow = (u64, Option<Fields>);

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_BUSY_SNAPSHOT.
fn is_contended(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5" | "6" | "517")),
        _ => false,
    }
}

/// A busy database is reported as a conflict on the batch's first document,
/// so transactions back off and retry.
fn commit_error(err: sqlx::Error, batch: &WriteBatch) -> StoreError {
    if !is_contended(&err) {
        return backend(err);
    }
    let doc = batch
        .preconditions
        .first()
        .map(|p| &p.doc)
        .or_else(|| batch.writes.first().map(|w| w.doc()));
    match doc {
        Some(doc) => StoreError::conflict(doc),
        None => backend(err),
    }
}

fn decode_row((version, body): RawRow) -> Result<StoredRow, StoreError> {
    let version = u64::try_from(version)
        .map_err(|_| StoreError::Backend(format!("negative document version {version}")))?;
    let fields = body.map(|text| serde_json::from_str(&text)).transpose()?;
    Ok((version, fields))
}

async fn load(conn: &mut SqliteConnection, doc: &DocRef) -> Result<Option<RawRow>, sqlx::Error> {
    sqlx::query_as::<_, RawRow>("SELECT version, body FROM documents WHERE collection = ? AND id = ?")
        .bind(doc.collection.as_str())
        .bind(&doc.id)
        .fetch_optional(conn)
        .await
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database at `url` and ensures the schema.
    ///
    /// `sqlite::memory:` databases live as long as their connection, so use
    /// `max_connections = 1` for them.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(backend)?;

        sqlx::query(SCHEMA).execute(&pool).await.map_err(backend)?;
        info!(max_connections, "sqlite document store ready");

        Ok(Self {
            pool,
            commit_lock: Mutex::new(()),
            clock: MonotonicClock::new(),
        })
    }

    async fn try_commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let sql_err = |err: sqlx::Error| commit_error(err, batch);
        let mut tx = self.pool.begin().await.map_err(sql_err)?;

        for precondition in &batch.preconditions {
            let current = load(&mut tx, &precondition.doc)
                .await
                .map_err(sql_err)?
                .map(decode_row)
                .transpose()?
                .and_then(|(version, body)| body.map(|_| version));
            if current != precondition.version {
                debug!(doc = %precondition.doc, ?current, expected = ?precondition.version, "precondition failed");
                return Err(StoreError::conflict(&precondition.doc));
            }
        }

        // Stage per document so each key is written, and versioned, once.
        let mut staged: BTreeMap<DocRef, (u64, Option<Fields>, Option<Fields>)> = BTreeMap::new();
        for write in &batch.writes {
            let doc = write.doc();
            if !staged.contains_key(doc) {
                let (version, body) = load(&mut tx, doc)
                    .await
                    .map_err(sql_err)?
                    .map(decode_row)
                    .transpose()?
                    .unwrap_or((0, None));
                staged.insert(doc.clone(), (version, body.clone(), body));
            }
            if let Some((_, _, next)) = staged.get_mut(doc) {
                *next = apply_write(next.as_ref(), write)?;
            }
        }

        for (doc, (version, before, after)) in staged {
            if before.is_none() && after.is_none() {
                continue;
            }
            let body = after.map(|fields| serde_json::to_string(&fields)).transpose()?;
            let version = i64::try_from(version + 1)
                .map_err(|_| StoreError::Backend(format!("version overflow on {doc}")))?;
            sqlx::query(
                "INSERT INTO documents (collection, id, version, body) VALUES (?, ?, ?, ?)
                 ON CONFLICT (collection, id) DO UPDATE SET version = excluded.version, body = excluded.body",
            )
            .bind(doc.collection.as_str())
            .bind(&doc.id)
            .bind(version)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        }

        tx.commit().await.map_err(sql_err)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        let doc = DocRef::new(collection, id);
        let row = load(&mut conn, &doc).await.map_err(backend)?;
        Ok(match row.map(decode_row).transpose()? {
            Some((version, Some(fields))) => Some(Snapshot {
                id: doc.id,
                version,
                fields,
            }),
            _ => None,
        })
    }

    async fn list_documents(&self, collection: Collection) -> Result<Vec<Snapshot>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64, Option<String>)>(
            "SELECT id, version, body FROM documents
             WHERE collection = ? AND body IS NOT NULL ORDER BY id",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for (id, version, body) in rows {
            if let (version, Some(fields)) = decode_row((version, body))? {
                snapshots.push(Snapshot { id, version, fields });
            }
        }
        Ok(snapshots)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock().await;
        self.try_commit(&batch).await
    }

    fn new_document_id(&self) -> String {
        generate_document_id()
    }

    fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
