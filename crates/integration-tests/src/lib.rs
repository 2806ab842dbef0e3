//! Shared fixtures for the cross-crate test suites.

use std::sync::Arc;
use std::time::Duration;

use domains::{Category, Identity, NewComment, NewPost, PostId};
use services::{Forum, TransactionPolicy};
use storage_adapters::MemoryDocumentStore;

/// A generous budget so heavily contended tests converge instead of
/// surfacing `Conflict`.
pub fn contended_policy() -> TransactionPolicy {
    TransactionPolicy {
        max_attempts: 10_000,
        initial_backoff: Duration::from_micros(50),
        max_backoff: Duration::from_millis(2),
    }
}

pub fn memory_forum() -> (Arc<MemoryDocumentStore>, Forum) {
    let store = Arc::new(MemoryDocumentStore::new());
    let forum = Forum::new(store.clone(), contended_policy());
    (store, forum)
}

/// The services as the seed binary wires them, on the default policy.
pub fn shipped_forum() -> (Arc<MemoryDocumentStore>, Forum) {
    let store = Arc::new(MemoryDocumentStore::new());
    let forum = Forum::new(store.clone(), TransactionPolicy::default());
    (store, forum)
}

pub fn ada() -> Identity {
    Identity::new("uid-ada", "Ada").with_profile_pic("https://cdn.example.test/ada.png")
}

pub fn grace() -> Identity {
    Identity::new("uid-grace", "Grace")
}

pub fn draft(title: &str) -> NewPost {
    NewPost {
        title: title.into(),
        category: Category::Career,
        plain_text: format!("{title} body"),
        rich_text: Some(format!("<p>{title} body</p>")),
    }
}

pub fn reply(text: &str) -> NewComment {
    NewComment {
        plain_text: text.into(),
        rich_text: Some(format!("<p>{text}</p>")),
    }
}

/// A fresh open post authored by [`ada`].
pub async fn seeded_post(forum: &Forum) -> PostId {
    match forum.posts.create(&ada(), draft("Hiring in Berlin")).await {
        Ok(id) => id,
        Err(err) => panic!("seeding a post failed: {err}"),
    }
}
