//! Optimistic read-modify-write on top of the [`DocumentStore`] commit.
//!
//! A transaction reads its declared documents, lets a synchronous body stage
//! writes, then commits with a version precondition on every document it read.
//! A conflicting concurrent write makes the commit fail as a whole; the runner
//! backs off and replays the body against fresh reads.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domains::{
    to_fields, AppError, Collection, DocRef, DocumentStore, Fields, PostId, Precondition,
    Result, Snapshot, StoreError, Write, WriteBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

pub(crate) fn post_ref(id: &PostId) -> DocRef {
    DocRef::new(Collection::Posts, id.as_str())
}

pub(crate) fn comments_ref(id: &PostId) -> DocRef {
    DocRef::new(Collection::Comments, id.as_str())
}

/// Retry budget for contended transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl TransactionPolicy {
    /// Upper bound of the delay before retrying after failed attempt number
    /// `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// The delay actually slept: a random point in the upper half of
    /// [`backoff`](Self::backoff), so writers that collided once do not
    /// wake up together and collide again.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        self.backoff(attempt).mul_f64(0.5 + rand::random::<f64>() * 0.5)
    }

    /// Same backoff, but conflicts are retried until the commit lands.
    pub fn until_committed(&self) -> Self {
        Self {
            max_attempts: u32::MAX,
            ..self.clone()
        }
    }
}

/// Reads and staged writes of one transaction attempt.
#[derive(Debug)]
pub struct Transaction {
    reads: BTreeMap<DocRef, Option<Snapshot>>,
    writes: Vec<Write>,
    timestamp: DateTime<Utc>,
}

impl Transaction {
    async fn begin(store: &dyn DocumentStore, docs: &[DocRef]) -> Result<Self, StoreError> {
        let mut reads = BTreeMap::new();
        for doc in docs {
            let snapshot = store.get_document(doc.collection, &doc.id).await?;
            reads.insert(doc.clone(), snapshot);
        }
        Ok(Self {
            reads,
            writes: Vec::new(),
            timestamp: store.server_timestamp(),
        })
    }

    /// `None` if the document was absent, or was not declared as a read.
    pub fn snapshot(&self, doc: &DocRef) -> Option<&Snapshot> {
        self.reads.get(doc).and_then(Option::as_ref)
    }

    pub fn read<T: DeserializeOwned>(&self, doc: &DocRef) -> Result<Option<T>> {
        Ok(self.snapshot(doc).map(Snapshot::decode).transpose()?)
    }

    /// Server time captured when this attempt started.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn set<T: Serialize>(&mut self, doc: DocRef, value: &T) -> Result<()> {
        self.writes.push(Write::Set(doc, to_fields(value)?));
        Ok(())
    }

    pub fn set_fields(&mut self, doc: DocRef, fields: Fields) {
        self.writes.push(Write::Set(doc, fields));
    }

    pub fn update_fields(&mut self, doc: DocRef, fields: Fields) {
        self.writes.push(Write::Update(doc, fields));
    }

    pub fn delete(&mut self, doc: DocRef) {
        self.writes.push(Write::Delete(doc));
    }

    fn into_batch(self) -> WriteBatch {
        let preconditions = self
            .reads
            .into_iter()
            .map(|(doc, snapshot)| Precondition {
                doc,
                version: snapshot.map(|s| s.version),
            })
            .collect();
        WriteBatch {
            preconditions,
            writes: self.writes,
        }
    }
}

/// Runs `body` as an atomic read-modify-write over `docs`.
///
/// Errors returned by `body` abort without retrying. Only commit conflicts
/// are retried; once `max_attempts` is spent the caller gets
/// [`AppError::Conflict`].
pub async fn run_transaction<T, F>(
    store: &dyn DocumentStore,
    policy: &TransactionPolicy,
    docs: &[DocRef],
    mut body: F,
) -> Result<T>
where
    F: FnMut(&mut Transaction) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let mut tx = Transaction::begin(store, docs).await?;
        let value = body(&mut tx)?;
        if tx.writes.is_empty() {
            return Ok(value);
        }

        match store.commit(tx.into_batch()).await {
            Ok(()) => return Ok(value),
            Err(err @ StoreError::Conflict { .. }) => {
                if attempt >= max_attempts {
                    warn!(attempt, error = %err, "transaction retry budget exhausted");
                    return Err(AppError::Conflict(format!(
                        "{err} (gave up after {attempt} attempts)"
                    )));
                }
                let delay = policy.jittered_backoff(attempt);
                debug!(attempt, ?delay, error = %err, "transaction conflicted, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
