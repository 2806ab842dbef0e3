//! # TechConnect services
//!
//! The data-consistency core of the forum: post CRUD, the per-post comment
//! map, likes, views, and the operations spanning a post and its comments.
//! Everything talks to the backing store through [`domains::DocumentStore`].

pub mod comment_map;
pub mod post_store;
pub mod reaction_ledger;
pub mod thread;
pub mod transaction;
pub mod view_counter;

use std::sync::Arc;

use domains::DocumentStore;

pub use comment_map::CommentMap;
pub use post_store::{DeleteOutcome, PostStore};
pub use reaction_ledger::ReactionLedger;
pub use thread::ThreadService;
pub use transaction::{run_transaction, Transaction, TransactionPolicy};
pub use view_counter::ViewCounter;

/// Every service over one shared store, configured with one retry policy.
#[derive(Clone)]
pub struct Forum {
    pub posts: PostStore,
    pub comments: CommentMap,
    pub reactions: ReactionLedger,
    pub views: ViewCounter,
    pub threads: ThreadService,
}

impl Forum {
    pub fn new(store: Arc<dyn DocumentStore>, policy: TransactionPolicy) -> Self {
        Self {
            posts: PostStore::new(store.clone()).with_policy(policy.clone()),
            comments: CommentMap::new(store.clone()).with_policy(policy.clone()),
            reactions: ReactionLedger::new(store.clone()).with_policy(policy.clone()),
            views: ViewCounter::new(store.clone()).with_policy(policy.clone()),
            threads: ThreadService::new(store).with_policy(policy),
        }
    }
}
