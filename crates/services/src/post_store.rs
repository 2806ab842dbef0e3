//! # PostStore
//!
//! CRUD over `posts/{id}` documents. Creation writes the post and its comment
//! map (entry "1" mirroring the body) in one commit; deletion removes both as
//! a best-effort pair.

use std::cmp::Ordering;
use std::sync::Arc;

use domains::{
    merge_fields, to_fields, AppError, Collection, CommentDocument, CommentId, DocumentStore,
    Identity, NewPost, Page, Post, PostId, PostPatch, PostQuery, PostStatus, Result, Snapshot,
    SortDirection, SortKey, StoreError, WriteBatch,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::transaction::{comments_ref, post_ref, run_transaction, Transaction, TransactionPolicy};

pub(crate) const POST_DELETED: &str = "Post deleted";

/// Result of [`PostStore::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Post and comment map are both gone.
    Complete,
    /// The post is gone but its comment map could not be deleted; the
    /// orphan is unreachable garbage. Carries the store's failure message.
    OrphanedComments(String),
}

#[derive(Clone)]
pub struct PostStore {
    store: Arc<dyn DocumentStore>,
    policy: TransactionPolicy,
}

pub(crate) fn decode_post(snapshot: &Snapshot) -> Result<Post> {
    let mut post: Post = snapshot.decode()?;
    post.id = PostId::new(snapshot.id.clone());
    Ok(post)
}

/// The post read by `tx`, or `NotFound`.
pub(crate) fn read_post(tx: &Transaction, id: &PostId) -> Result<Post> {
    let snapshot = tx
        .snapshot(&post_ref(id))
        .ok_or_else(|| AppError::NotFound("post", id.to_string()))?;
    decode_post(snapshot)
}

pub(crate) fn authorize(caller: &Identity, post: &Post) -> Result<()> {
    if caller.is_author_of(&post.author) {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "'{}' is not the author of post {}",
            caller.display_name, post.id
        )))
    }
}

impl PostStore {
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

    /// Creates a post under a store-generated ID.
    pub async fn create(&self, author: &Identity, draft: NewPost) -> Result<PostId> {
        let id = PostId::new(self.store.new_document_id());
        self.create_with_id(id, author, draft).await
    }

    /// Creates a post under a caller-supplied ID; `Conflict` if the ID is taken.
    ///
    /// A leftover comment map under the same ID is overwritten.
    #[instrument(skip(self, author, draft), fields(post_id = %id))]
    pub async fn create_with_id(
        &self,
        id: PostId,
        author: &Identity,
        draft: NewPost,
    ) -> Result<PostId> {
        if draft.plain_text.trim().is_empty() {
            return Err(AppError::validation("post body must not be empty"));
        }

        let now = self.store.server_timestamp();
        let post = Post {
            id: id.clone(),
            title: draft.title,
            author: author.display_name.clone(),
            profile_pic_url: author.profile_pic_url.clone(),
            category: draft.category,
            plain_text: draft.plain_text,
            rich_text: draft.rich_text,
            status: PostStatus::Open,
            timestamp: now,
            last_edit: now,
            comment_count: 1,
            views: 0,
            likes_count: 0,
            user_likes: Vec::new(),
        };
        post.validate().map_err(AppError::ValidationError)?;
        let comments = CommentDocument::with_body(post.body_entry());

        let batch = WriteBatch::new()
            .expect_version(post_ref(&id), None)
            .set(post_ref(&id), to_fields(&post)?)
            .set(comments_ref(&id), to_fields(&comments)?);
        match self.store.commit(batch).await {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => {
                return Err(AppError::Conflict(format!("post {id} already exists")))
            }
            Err(err) => return Err(err.into()),
        }

        info!(category = ?post.category, "created post");
        Ok(id)
    }

    /// Reads a single post; `NotFound` when no such document exists.
    pub async fn get(&self, id: &PostId) -> Result<Post> {
        let snapshot = self
            .store
            .get_document(Collection::Posts, id.as_str())
            .await?
            .ok_or_else(|| AppError::NotFound("post", id.to_string()))?;
        decode_post(&snapshot)
    }

    /// Merges `patch` onto the stored post, last write wins per field.
    ///
    /// Title or body changes stamp `lastEdit`. Fields the patch does not name,
    /// including ones this crate does not model, are preserved.
    pub async fn update(&self, id: &PostId, patch: PostPatch) -> Result<Post> {
        self.apply_patch(id, None, patch).await
    }

    /// Opens or closes a thread to new comments. Author only.
    pub async fn set_status(
        &self,
        id: &PostId,
        caller: &Identity,
        status: PostStatus,
    ) -> Result<Post> {
        self.apply_patch(id, Some(caller), PostPatch::status(status))
            .await
    }

    #[instrument(skip(self, caller, patch), fields(post_id = %id))]
    async fn apply_patch(
        &self,
        id: &PostId,
        caller: Option<&Identity>,
        patch: PostPatch,
    ) -> Result<Post> {
        if matches!(&patch.plain_text, Some(text) if text.trim().is_empty()) {
            return Err(AppError::validation("post body must not be empty"));
        }
        let stamp_edit = patch.touches_content();
        let patch = to_fields(&patch)?;
        let doc = post_ref(id);

        run_transaction(&*self.store, &self.policy, &[doc.clone()], |tx| {
            let stored = read_post(tx, id)?;
            if let Some(caller) = caller {
                authorize(caller, &stored)?;
            }

            let mut fields = tx
                .snapshot(&doc)
                .map(|s| s.fields.clone())
                .unwrap_or_default();
            merge_fields(&mut fields, patch.clone());
            if stamp_edit {
                fields.insert("lastEdit".into(), serde_json::to_value(tx.timestamp())?);
            }

            let mut post: Post = serde_json::from_value(Value::Object(fields.clone()))?;
            post.id = id.clone();
            post.validate().map_err(AppError::ValidationError)?;

            tx.set_fields(doc.clone(), fields);
            Ok(post)
        })
        .await
    }

    /// Soft delete: keeps the thread reachable but strips authorship and
    /// content, resets the comment count and closes it. Author only.
    #[instrument(skip(self, caller), fields(post_id = %id))]
    pub async fn invalidate(&self, id: &PostId, caller: &Identity) -> Result<Post> {
        let post_doc = post_ref(id);
        let comments_doc = comments_ref(id);

        let post = run_transaction(
            &*self.store,
            &self.policy,
            &[post_doc.clone(), comments_doc.clone()],
            |tx| {
                let mut post = read_post(tx, id)?;
                authorize(caller, &post)?;

                post.author.clear();
                post.profile_pic_url = None;
                post.plain_text = POST_DELETED.into();
                post.rich_text = Some(format!("<blockquote>{POST_DELETED}</blockquote>"));
                post.comment_count = 1;
                post.status = PostStatus::Closed;
                post.last_edit = tx.timestamp();
                tx.set(post_doc.clone(), &post)?;

                if let Some(mut comments) = tx.read::<CommentDocument>(&comments_doc)? {
                    let mut body = post.body_entry();
                    if let Some(old) = comments.body() {
                        body.reactions = old.reactions.clone();
                    }
                    comments.insert(CommentId::BODY, body);
                    tx.set(comments_doc.clone(), &comments)?;
                }
                Ok(post)
            },
        )
        .await?;

        info!("invalidated post");
        Ok(post)
    }

    /// Deletes the post and then its comment map. Author only.
    ///
    /// The two deletes are not atomic. A failure of the second one is logged
    /// and reported through [`DeleteOutcome::OrphanedComments`] instead of
    /// failing the call, since the post itself is already gone.
    #[instrument(skip(self, caller), fields(post_id = %id))]
    pub async fn delete(&self, id: &PostId, caller: &Identity) -> Result<DeleteOutcome> {
        let post = self.get(id).await?;
        authorize(caller, &post)?;

        self.store
            .delete_document(Collection::Posts, id.as_str())
            .await?;
        info!("deleted post document");

        match self
            .store
            .delete_document(Collection::Comments, id.as_str())
            .await
        {
            Ok(()) => Ok(DeleteOutcome::Complete),
            Err(err) => {
                warn!(error = %err, "post deleted but its comment map was left behind");
                Ok(DeleteOutcome::OrphanedComments(err.to_string()))
            }
        }
    }

    /// Every post, as a one-shot snapshot.
    ///
    /// Documents that fail to decode are skipped with a warning rather than
    /// failing the whole listing.
    pub async fn list(&self) -> Result<Vec<Post>> {
        let snapshots = self.store.list_documents(Collection::Posts).await?;
        Ok(snapshots
            .iter()
            .filter_map(|snapshot| match decode_post(snapshot) {
                Ok(post) => Some(post),
                Err(err) => {
                    warn!(post_id = %snapshot.id, error = %err, "skipping malformed post");
                    None
                }
            })
            .collect())
    }

    /// Filters, sorts and pages the full listing.
    pub async fn query(&self, query: &PostQuery) -> Result<Page<Post>> {
        Ok(paginate(self.list().await?, query))
    }
}

fn compare(a: &Post, b: &Post, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Timestamp => a.timestamp.cmp(&b.timestamp),
        SortKey::Views => a.views.cmp(&b.views),
        SortKey::Likes => a.likes_count.cmp(&b.likes_count),
        SortKey::Comments => a.comment_count.cmp(&b.comment_count),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

pub(crate) fn paginate(mut posts: Vec<Post>, query: &PostQuery) -> Page<Post> {
    if let Some(category) = query.category {
        posts.retain(|p| p.category == category);
    }
    posts.sort_by(|a, b| match query.direction {
        SortDirection::Asc => compare(a, b, query.sort),
        SortDirection::Desc => compare(b, a, query.sort),
    });

    let page_size = query.page_size.max(1);
    let total_items = posts.len();
    let items = posts
        .into_iter()
        .skip(query.page.saturating_mul(page_size))
        .take(page_size)
        .collect();

    Page {
        items,
        page: query.page,
        total_items,
        total_pages: total_items.div_ceil(page_size),
    }
}
