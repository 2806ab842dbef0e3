use std::sync::Arc;

use domains::{to_fields, DocumentStore, PostId, Result};
use serde_json::json;
use tracing::warn;

use crate::post_store::read_post;
use crate::transaction::{post_ref, run_transaction, TransactionPolicy};

/// Transactional `views` counter. Losing a view is harmless, so failures
/// are logged and swallowed.
#[derive(Clone)]
pub struct ViewCounter {
    store: Arc<dyn DocumentStore>,
    policy: TransactionPolicy,
}

impl ViewCounter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            policy: TransactionPolicy::default().until_committed(),
        }
    }

    /// Takes the backoff of `policy`; conflicts are still retried until
    /// the counter commits.
    pub fn with_policy(mut self, policy: TransactionPolicy) -> Self {
        self.policy = policy.until_committed();
        self
    }

    /// Adds one view. Returns the new count, or `None` if the increment
    /// failed (already logged).
    pub async fn increment(&self, post_id: &PostId) -> Option<u64> {
        match self.try_increment(post_id).await {
            Ok(views) => Some(views),
            Err(err) => {
                warn!(%post_id, error = %err, "failed to record post view");
                None
            }
        }
    }

    async fn try_increment(&self, post_id: &PostId) -> Result<u64> {
        let doc = post_ref(post_id);
        run_transaction(&*self.store, &self.policy, &[doc.clone()], |tx| {
            let views = read_post(tx, post_id)?.views.saturating_add(1);
            tx.update_fields(doc.clone(), to_fields(&json!({ "views": views }))?);
            Ok(views)
        })
        .await
    }
}
