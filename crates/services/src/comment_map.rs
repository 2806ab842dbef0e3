//! # CommentMap
//!
//! All comments of a post live in one map document, `comments/{post_id}`,
//! keyed by string-encoded positive integers. Entry "1" mirrors the post body.
//!
//! Every mutation is a transaction over the whole map, so two concurrent
//! appends can never be handed the same ID: the loser of the commit race
//! re-reads the map and takes the next one.

use std::collections::BTreeMap;
use std::sync::Arc;

use domains::{
    merge_fields, to_fields, AppError, Collection, CommentDocument, CommentEntry, CommentId,
    CommentPatch, DocumentStore, Identity, NewComment, PostId, Reaction, Result,
};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::post_store::read_post;
use crate::transaction::{comments_ref, post_ref, run_transaction, Transaction, TransactionPolicy};

#[derive(Clone)]
pub struct CommentMap {
    store: Arc<dyn DocumentStore>,
    policy: TransactionPolicy,
}

pub(crate) fn read_comments(tx: &Transaction, post_id: &PostId) -> Result<CommentDocument> {
    tx.read::<CommentDocument>(&comments_ref(post_id))?
        .ok_or_else(|| AppError::NotFound("comment map", post_id.to_string()))
}

pub(crate) fn comment_not_found(post_id: &PostId, comment_id: CommentId) -> AppError {
    AppError::NotFound("comment", format!("{post_id}/{comment_id}"))
}

/// Merges `patch` onto `entry`; content changes stamp `lastEdit` with `now`.
pub(crate) fn patch_entry(
    entry: &CommentEntry,
    patch: &CommentPatch,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<CommentEntry> {
    let mut fields = to_fields(entry)?;
    merge_fields(&mut fields, to_fields(patch)?);
    if patch.plain_text.is_some() || patch.rich_text.is_some() {
        fields.insert("lastEdit".into(), serde_json::to_value(now)?);
    }
    Ok(serde_json::from_value(Value::Object(fields))?)
}

impl CommentMap {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            policy: TransactionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TransactionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The whole map of a post; `NotFound` if the post has none.
    pub async fn get(&self, post_id: &PostId) -> Result<CommentDocument> {
        let snapshot = self
            .store
            .get_document(Collection::Comments, post_id.as_str())
            .await?
            .ok_or_else(|| AppError::NotFound("comment map", post_id.to_string()))?;
        Ok(snapshot.decode()?)
    }

    /// Appends a reply and returns its ID: the highest reply ID plus one,
    /// or 2 for the first reply.
    ///
    /// The post must exist and be open. The same commit records the new ID
    /// as the post's comment count.
    #[instrument(skip_all, fields(%post_id))]
    pub async fn append(
        &self,
        post_id: &PostId,
        author: &Identity,
        comment: NewComment,
    ) -> Result<CommentId> {
        if comment.plain_text.trim().is_empty() {
            return Err(AppError::validation("comment text must not be empty"));
        }
        let post_doc = post_ref(post_id);
        let comments_doc = comments_ref(post_id);

        let id = run_transaction(
            &*self.store,
            &self.policy,
            &[post_doc.clone(), comments_doc.clone()],
            |tx| {
                let post = read_post(tx, post_id)?;
                if !post.is_open() {
                    return Err(AppError::validation(format!(
                        "post {post_id} is closed to new comments"
                    )));
                }
                // A thread that lost its map starts a fresh one from the body.
                let mut comments = tx
                    .read::<CommentDocument>(&comments_doc)?
                    .unwrap_or_else(|| CommentDocument::with_body(post.body_entry()));

                let id = comments.next_reply_id()?;
                let now = tx.timestamp();
                comments.insert(
                    id,
                    CommentEntry {
                        author: author.display_name.clone(),
                        plain_text: comment.plain_text.clone(),
                        rich_text: comment.rich_text.clone(),
                        timestamp: now,
                        last_edit: Some(now),
                        profile_pic_url: author.profile_pic_url.clone(),
                        reactions: BTreeMap::new(),
                    },
                );
                tx.set(comments_doc.clone(), &comments)?;
                // The post records the newest assigned ID, not the live entry
                // count; only removal recounts from the map.
                tx.update_fields(post_doc.clone(), to_fields(&json!({ "commentCount": id.get() }))?);
                Ok(id)
            },
        )
        .await?;

        debug!(comment_id = %id, "appended comment");
        Ok(id)
    }

    /// Merges `patch` onto one entry.
    ///
    /// Editing entry "1" here does not touch the post document; use
    /// `ThreadService::update_post_body` to keep both copies of the body in step.
    pub async fn update(
        &self,
        post_id: &PostId,
        comment_id: CommentId,
        patch: CommentPatch,
    ) -> Result<CommentEntry> {
        if matches!(&patch.plain_text, Some(text) if text.trim().is_empty()) {
            return Err(AppError::validation("comment text must not be empty"));
        }
        let doc = comments_ref(post_id);

        run_transaction(&*self.store, &self.policy, &[doc.clone()], |tx| {
            let mut comments = read_comments(tx, post_id)?;
            let entry = comments
                .get(comment_id)
                .ok_or_else(|| comment_not_found(post_id, comment_id))?;
            let updated = patch_entry(entry, &patch, tx.timestamp())?;
            comments.insert(comment_id, updated.clone());
            tx.set(doc.clone(), &comments)?;
            Ok(updated)
        })
        .await
    }

    /// Removes one reply and returns the comment count the post should now
    /// record (`|map| - 1`, never below 1).
    ///
    /// The post document is not touched; `ThreadService::remove_comment`
    /// does both in one commit.
    pub async fn remove(&self, post_id: &PostId, comment_id: CommentId) -> Result<u32> {
        if comment_id.is_body() {
            return Err(AppError::validation(
                "comment 1 is the post body; delete the post instead",
            ));
        }
        let doc = comments_ref(post_id);

        run_transaction(&*self.store, &self.policy, &[doc.clone()], |tx| {
            let mut comments = read_comments(tx, post_id)?;
            comments
                .remove(comment_id)
                .ok_or_else(|| comment_not_found(post_id, comment_id))?;
            tx.set(doc.clone(), &comments)?;
            Ok(comments.recounted())
        })
        .await
    }

    /// Adds one reaction to an entry and returns that reaction's new count.
    pub async fn react(
        &self,
        post_id: &PostId,
        comment_id: CommentId,
        reaction: Reaction,
    ) -> Result<u64> {
        let doc = comments_ref(post_id);

        run_transaction(&*self.store, &self.policy, &[doc.clone()], |tx| {
            let mut comments = read_comments(tx, post_id)?;
            let entry = comments
                .get_mut(comment_id)
                .ok_or_else(|| comment_not_found(post_id, comment_id))?;
            let count = entry
                .reactions
                .entry(reaction.as_str().to_string())
                .or_insert(0);
            *count += 1;
            let count = *count;
            tx.set(doc.clone(), &comments)?;
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::{MockDocumentStore, Snapshot, StoreError};

    fn entry() -> CommentEntry {
        CommentEntry {
            author: "ada".into(),
            plain_text: "first".into(),
            rich_text: None,
            timestamp: Utc::now(),
            last_edit: None,
            profile_pic_url: Some("https://example.test/ada.png".into()),
            reactions: BTreeMap::from([("like".to_string(), 2)]),
        }
    }

    #[test]
    fn patching_text_stamps_last_edit_and_keeps_the_rest() {
        let original = entry();
        let now = Utc::now();
        let patch = CommentPatch {
            plain_text: Some("second".into()),
            ..CommentPatch::default()
        };

        let patched = patch_entry(&original, &patch, now).unwrap();
        assert_eq!(patched.plain_text, "second");
        assert_eq!(patched.last_edit, Some(now));
        assert_eq!(patched.author, "ada");
        assert_eq!(patched.reaction_count(Reaction::Like), 2);
    }

    #[test]
    fn clearing_the_picture_is_not_an_edit() {
        let patch = CommentPatch {
            profile_pic_url: Some(None),
            ..CommentPatch::default()
        };
        let patched = patch_entry(&entry(), &patch, Utc::now()).unwrap();
        assert_eq!(patched.profile_pic_url, None);
        assert_eq!(patched.last_edit, None);
    }

    #[tokio::test]
    async fn removing_the_body_is_rejected_up_front() {
        let mut mock = MockDocumentStore::new();
        mock.expect_get_document().never();

        let err = CommentMap::new(Arc::new(mock))
            .remove(&PostId::new("p1"), CommentId::BODY)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn append_surfaces_a_failed_read_as_persistence_error() {
        let mut mock = MockDocumentStore::new();
        mock.expect_get_document()
            .returning(|_, _| Err(StoreError::Backend("network unreachable".into())));

        let err = CommentMap::new(Arc::new(mock))
            .append(
                &PostId::new("p1"),
                &Identity::new("u1", "ada"),
                NewComment {
                    plain_text: "hi".into(),
                    rich_text: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PersistenceError(_)));
    }

    fn failing_writes() -> CommentMap {
        let mut doc = CommentDocument::with_body(entry());
        doc.insert(CommentId::FIRST_REPLY, entry());
        let fields = to_fields(&doc).unwrap();
        let mut mock = MockDocumentStore::new();
        mock.expect_get_document().returning(move |_, id| {
            Ok(Some(Snapshot { id: id.to_string(), version: 2, fields: fields.clone() }))
        });
        mock.expect_server_timestamp().returning(Utc::now);
        mock.expect_commit()
            .times(1)
            .returning(|_| Err(StoreError::Backend("write timed out".into())));
        CommentMap::new(Arc::new(mock))
    }

    #[tokio::test]
    async fn update_surfaces_a_failed_write_as_persistence_error() {
        let patch = CommentPatch {
            plain_text: Some("edited".into()),
            ..CommentPatch::default()
        };
        let err = failing_writes()
            .update(&PostId::new("p1"), CommentId::FIRST_REPLY, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PersistenceError(_)));
    }

    #[tokio::test]
    async fn remove_surfaces_a_failed_write_as_persistence_error() {
        let err = failing_writes()
            .remove(&PostId::new("p1"), CommentId::FIRST_REPLY)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PersistenceError(_)));
    }
}
