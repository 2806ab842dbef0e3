//! # Domain Models
//!
//! These structs represent the core entities of TechConnect.
//! A thread is two documents: the `Post` in `posts/{id}` and its
//! `CommentDocument` in `comments/{id}`, where entry `"1"` mirrors the post body.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Document ID shared by a post and its comment map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Positive integer key of a comment, string-encoded in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CommentId(u32);

impl CommentId {
    /// The sentinel entry that mirrors the post body.
    pub const BODY: CommentId = CommentId(1);
    /// First ID handed to a reply.
    pub const FIRST_REPLY: CommentId = CommentId(2);

    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_body(self) -> bool {
        self == Self::BODY
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<u32> for CommentId {
    type Error = String;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        CommentId::new(id).ok_or_else(|| format!("{id} is not a positive comment ID"))
    }
}

impl From<CommentId> for u32 {
    fn from(id: CommentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for CommentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .and_then(CommentId::new)
            .ok_or_else(|| format!("'{s}' is not a positive comment ID"))
    }
}

/// Explicit caller identity, passed to every operation that needs one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable account ID; recorded in `userLikes`.
    pub user_id: String,
    /// Display name; recorded as `author` and compared on delete.
    pub display_name: String,
    pub profile_pic_url: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            profile_pic_url: None,
        }
    }

    pub fn with_profile_pic(mut self, url: impl Into<String>) -> Self {
        self.profile_pic_url = Some(url.into());
        self
    }

    /// Authorship is a plain string comparison against the stored author.
    pub fn is_author_of(&self, recorded_author: &str) -> bool {
        !recorded_author.is_empty() && self.display_name == recorded_author
    }
}

/// Predefined thread tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Jobs,
    Career,
    Companies,
    Skills,
    News,
    /// Also what legacy or unrecognised tags read back as.
    #[default]
    #[serde(other)]
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Jobs,
        Category::Career,
        Category::Companies,
        Category::Skills,
        Category::News,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Jobs => "Jobs & Referrals",
            Category::Career => "Career Discussion",
            Category::Companies => "Company Reviews",
            Category::Skills => "Skills & Learning",
            Category::News => "News & Updates",
            Category::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Open,
    Closed,
}

impl PostStatus {
    pub fn toggled(self) -> Self {
        match self {
            PostStatus::Open => PostStatus::Closed,
            PostStatus::Closed => PostStatus::Open,
        }
    }
}

/// A forum thread's metadata and body, as stored in `posts/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// The document ID; not part of the stored fields.
    #[serde(skip)]
    pub id: PostId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    #[serde(default)]
    pub category: Category,
    pub plain_text: String,
    #[serde(default)]
    pub rich_text: Option<String>,
    #[serde(default)]
    pub status: PostStatus,
    pub timestamp: DateTime<Utc>,
    pub last_edit: DateTime<Utc>,
    /// Counts the body as comment "1"; never below 1.
    pub comment_count: u32,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub user_likes: Vec<String>,
}

impl Post {
    /// Replies shown under the body.
    pub fn reply_count(&self) -> u32 {
        self.comment_count.saturating_sub(1)
    }

    pub fn is_open(&self) -> bool {
        self.status == PostStatus::Open
    }

    pub fn liked_by(&self, user_id: &str) -> bool {
        self.user_likes.iter().any(|u| u == user_id)
    }

    /// The mirror of this post stored as comment "1".
    pub fn body_entry(&self) -> CommentEntry {
        CommentEntry {
            author: self.author.clone(),
            plain_text: self.plain_text.clone(),
            rich_text: self.rich_text.clone(),
            timestamp: self.timestamp,
            last_edit: Some(self.last_edit),
            profile_pic_url: self.profile_pic_url.clone(),
            reactions: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("post title must not be empty".into());
        }
        if self.comment_count < 1 {
            return Err(format!(
                "comment count must be at least 1, got {}",
                self.comment_count
            ));
        }
        Ok(())
    }
}

/// Caller-supplied content of a new post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub category: Category,
    pub plain_text: String,
    pub rich_text: Option<String>,
}

/// Partial post fields; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// `Some(None)` clears the picture.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u32>,
}

impl PostPatch {
    /// Whether applying this patch counts as an edit of the post content.
    pub fn touches_content(&self) -> bool {
        self.title.is_some() || self.plain_text.is_some() || self.rich_text.is_some()
    }

    pub fn comment_count(count: u32) -> Self {
        Self { comment_count: Some(count), ..Self::default() }
    }

    pub fn status(status: PostStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }
}

/// New title and body for a thread; applied to the post and its entry "1" together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBodyEdit {
    /// `None` keeps the current title.
    pub title: Option<String>,
    pub plain_text: String,
    pub rich_text: Option<String>,
}

/// Reactions a reader can leave on a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Love,
    Laugh,
}

impl Reaction {
    pub fn as_str(self) -> &'static str {
        match self {
            Reaction::Like => "like",
            Reaction::Love => "love",
            Reaction::Laugh => "laugh",
        }
    }
}

/// One entry of a comment map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEntry {
    pub author: String,
    pub plain_text: String,
    #[serde(default)]
    pub rich_text: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub last_edit: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<String>,
    /// Reaction name ("like", "love", "laugh") to count.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, u64>,
}

impl CommentEntry {
    /// Falls back to the creation time for never-edited entries.
    pub fn last_edited(&self) -> DateTime<Utc> {
        self.last_edit.unwrap_or(self.timestamp)
    }

    pub fn reaction_count(&self, reaction: Reaction) -> u64 {
        self.reactions.get(reaction.as_str()).copied().unwrap_or(0)
    }
}

/// Caller-supplied content of a reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub plain_text: String,
    pub rich_text: Option<String>,
}

/// Partial comment fields; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plain_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<String>,
    /// `Some(None)` clears the picture.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<Option<String>>,
}

/// The single map document holding every comment of a post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentDocument(BTreeMap<CommentId, CommentEntry>);

impl CommentDocument {
    /// A map holding only the body mirror.
    pub fn with_body(body: CommentEntry) -> Self {
        let mut doc = Self::default();
        doc.0.insert(CommentId::BODY, body);
        doc
    }

    /// `max(existing IDs excluding "1") + 1`, or 2 when there are no replies.
    /// Fails once the highest stored ID is `u32::MAX`.
    pub fn next_reply_id(&self) -> crate::Result<CommentId> {
        match self.0.keys().filter(|id| !id.is_body()).max() {
            None => Ok(CommentId::FIRST_REPLY),
            Some(max) => max
                .0
                .checked_add(1)
                .map(CommentId)
                .ok_or_else(|| AppError::validation(format!("no comment ID follows {max}"))),
        }
    }

    /// Comment count to record on the post after a removal: `|map| - 1`,
    /// never below 1.
    pub fn recounted(&self) -> u32 {
        let len = u32::try_from(self.0.len()).unwrap_or(u32::MAX);
        len.saturating_sub(1).max(1)
    }

    pub fn get(&self, id: CommentId) -> Option<&CommentEntry> {
        self.0.get(&id)
    }

    pub fn get_mut(&mut self, id: CommentId) -> Option<&mut CommentEntry> {
        self.0.get_mut(&id)
    }

    pub fn body(&self) -> Option<&CommentEntry> {
        self.get(CommentId::BODY)
    }

    pub fn insert(&mut self, id: CommentId, entry: CommentEntry) -> Option<CommentEntry> {
        self.0.insert(id, entry)
    }

    pub fn remove(&mut self, id: CommentId) -> Option<CommentEntry> {
        self.0.remove(&id)
    }

    /// Entries other than the body mirror, in key order.
    pub fn replies(&self) -> impl Iterator<Item = (CommentId, &CommentEntry)> {
        self.0.iter().filter(|(id, _)| !id.is_body()).map(|(id, e)| (*id, e))
    }

    pub fn ids(&self) -> impl Iterator<Item = CommentId> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Column a post listing is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Timestamp,
    Views,
    Likes,
    Comments,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Filtering, ordering and paging layered over the full post listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostQuery {
    pub category: Option<Category>,
    pub sort: SortKey,
    pub direction: SortDirection,
    /// Zero-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self {
            category: None,
            sort: SortKey::default(),
            direction: SortDirection::default(),
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}
