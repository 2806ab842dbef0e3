//! # ThreadService
//!
//! Operations that must keep a post and its comment map coherent. Each one
//! reads both documents and writes both in a single commit.

use std::sync::Arc;

use domains::{
    to_fields, AppError, CommentDocument, CommentEntry, CommentId, DocumentStore, Identity, Post,
    PostBodyEdit, PostId, Result,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::comment_map::{comment_not_found, read_comments};
use crate::post_store::{authorize, read_post};
use crate::transaction::{comments_ref, post_ref, run_transaction, TransactionPolicy};

pub(crate) const COMMENT_DELETED: &str = "Comment deleted";

#[derive(Clone)]
pub struct ThreadService {
    store: Arc<dyn DocumentStore>,
    policy: TransactionPolicy,
}

impl ThreadService {
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

    /// Edits the post body and its mirror entry "1" together. Author only.
    ///
    /// Reactions on entry "1" survive the edit. A missing comment map is
    /// recreated from the edited post.
    #[instrument(skip_all, fields(%post_id))]
    pub async fn update_post_body(
        &self,
        post_id: &PostId,
        caller: &Identity,
        edit: PostBodyEdit,
    ) -> Result<Post> {
        if edit.plain_text.trim().is_empty() {
            return Err(AppError::validation("post body must not be empty"));
        }
        let post_doc = post_ref(post_id);
        let comments_doc = comments_ref(post_id);

        run_transaction(
            &*self.store,
            &self.policy,
            &[post_doc.clone(), comments_doc.clone()],
            |tx| {
                let mut post = read_post(tx, post_id)?;
                authorize(caller, &post)?;

                if let Some(title) = &edit.title {
                    post.title = title.clone();
                }
                post.plain_text = edit.plain_text.clone();
                post.rich_text = edit.rich_text.clone();
                post.last_edit = tx.timestamp();
                post.validate().map_err(AppError::ValidationError)?;

                let mut body = post.body_entry();
                let mut comments = tx
                    .read::<CommentDocument>(&comments_doc)?
                    .unwrap_or_default();
                if let Some(old) = comments.body() {
                    body.reactions = old.reactions.clone();
                }
                comments.insert(CommentId::BODY, body);

                tx.update_fields(
                    post_doc.clone(),
                    to_fields(&json!({
                        "title": post.title,
                        "plainText": post.plain_text,
                        "richText": post.rich_text,
                        "lastEdit": post.last_edit,
                    }))?,
                );
                tx.set(comments_doc.clone(), &comments)?;
                Ok(post)
            },
        )
        .await
    }

    /// Removes a reply and records the recounted comment count on the post
    /// in the same commit. Returns the new count.
    #[instrument(skip_all, fields(%post_id, %comment_id))]
    pub async fn remove_comment(&self, post_id: &PostId, comment_id: CommentId) -> Result<u32> {
        if comment_id.is_body() {
            return Err(AppError::validation(
                "comment 1 is the post body; delete the post instead",
            ));
        }
        let post_doc = post_ref(post_id);
        let comments_doc = comments_ref(post_id);

        let count = run_transaction(
            &*self.store,
            &self.policy,
            &[post_doc.clone(), comments_doc.clone()],
            |tx| {
                read_post(tx, post_id)?;
                let mut comments = read_comments(tx, post_id)?;
                comments
                    .remove(comment_id)
                    .ok_or_else(|| comment_not_found(post_id, comment_id))?;
                let count = comments.recounted();

                tx.set(comments_doc.clone(), &comments)?;
                tx.update_fields(
                    post_doc.clone(),
                    to_fields(&json!({ "commentCount": count }))?,
                );
                Ok(count)
            },
        )
        .await?;

        info!(comment_count = count, "removed comment");
        Ok(count)
    }

    /// Soft-deletes a reply: the entry stays in place so IDs and thread
    /// shape are preserved, but its author and text are blanked. Author only.
    #[instrument(skip_all, fields(%post_id, %comment_id))]
    pub async fn invalidate_comment(
        &self,
        post_id: &PostId,
        comment_id: CommentId,
        caller: &Identity,
    ) -> Result<CommentEntry> {
        if comment_id.is_body() {
            return Err(AppError::validation(
                "comment 1 is the post body; invalidate the post instead",
            ));
        }
        let comments_doc = comments_ref(post_id);

        run_transaction(&*self.store, &self.policy, &[comments_doc.clone()], |tx| {
            let mut comments = read_comments(tx, post_id)?;
            let now = tx.timestamp();
            let entry = comments
                .get_mut(comment_id)
                .ok_or_else(|| comment_not_found(post_id, comment_id))?;
            if !caller.is_author_of(&entry.author) {
                return Err(AppError::Unauthorized(format!(
                    "'{}' is not the author of comment {post_id}/{comment_id}",
                    caller.display_name
                )));
            }

            entry.author.clear();
            entry.profile_pic_url = None;
            entry.plain_text = COMMENT_DELETED.into();
            entry.rich_text = Some(format!("<blockquote>{COMMENT_DELETED}</blockquote>"));
            entry.last_edit = Some(now);
            let entry = entry.clone();

            tx.set(comments_doc.clone(), &comments)?;
            Ok(entry)
        })
        .await
    }
}
