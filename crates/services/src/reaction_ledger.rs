use std::sync::Arc;

use domains::{to_fields, DocumentStore, Identity, PostId, Result};
use serde_json::json;
use tracing::{debug, instrument};

use crate::post_store::read_post;
use crate::transaction::{post_ref, run_transaction, TransactionPolicy};

/// Per-post like membership, embedded in the post as `userLikes`/`likesCount`.
#[derive(Clone)]
pub struct ReactionLedger {
    store: Arc<dyn DocumentStore>,
    policy: TransactionPolicy,
}

impl ReactionLedger {
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

    /// Flips the caller's membership in the post's like set and returns the
    /// new set. `likesCount` is rewritten in the same commit.
    #[instrument(skip_all, fields(%post_id, user_id = %caller.user_id))]
    pub async fn toggle(&self, post_id: &PostId, caller: &Identity) -> Result<Vec<String>> {
        let doc = post_ref(post_id);

        let likes = run_transaction(&*self.store, &self.policy, &[doc.clone()], |tx| {
            let mut likes = read_post(tx, post_id)?.user_likes;
            match likes.iter().position(|u| *u == caller.user_id) {
                Some(index) => {
                    likes.remove(index);
                }
                None => likes.push(caller.user_id.clone()),
            }
            tx.update_fields(
                doc.clone(),
                to_fields(&json!({ "userLikes": likes, "likesCount": likes.len() }))?,
            );
            Ok(likes)
        })
        .await?;

        debug!(likes = likes.len(), "toggled like");
        Ok(likes)
    }
}
