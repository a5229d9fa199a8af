use std::sync::atomic::{AtomicU64, Ordering};

use relatos_shared::{CommentRow, PostId, PostRow, UserId};
use serde::{Deserialize, Serialize};

pub const ANONYMOUS_NAME: &str = "Anônimo";
pub const UNKNOWN_AUTHOR_NAME: &str = "Usuário";

/// Identifier of a comment in the local feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommentId {
    /// Assigned by the gateway.
    Server(i64),
    /// Local placeholder awaiting the next canonical refresh.
    Pending(u64),
}

impl CommentId {
    pub fn is_pending(&self) -> bool {
        matches!(self, CommentId::Pending(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: String,
}

impl Comment {
    /// A speculative comment stamped with the local clock.
    pub fn pending(post_id: PostId, author_id: UserId, body: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: CommentId::Pending(next_pending_id(now.timestamp_millis())),
            post_id,
            author_id,
            body: body.to_string(),
            created_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: CommentId::Server(row.id),
            post_id: row.post_id,
            author_id: row.author_id,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

static LAST_PENDING: AtomicU64 = AtomicU64::new(0);

/// Millisecond clock value, bumped so ids stay unique within the process.
fn next_pending_id(now_millis: i64) -> u64 {
    let now = u64::try_from(now_millis).unwrap_or(0);
    let mut prev = LAST_PENDING.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_PENDING.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// A post as presented by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    pub id: PostId,
    pub body: String,
    pub category: String,
    pub is_anonymous: bool,
    pub author_id: UserId,
    pub author_name: String,
    pub created_at: String,
    pub like_count: u64,
    pub liked_by_me: bool,
    pub comments: Vec<Comment>,
}

impl FeedPost {
    /// Format a gateway row for `viewer`. Like rows are scanned for the
    /// viewer's id; the author's name is masked for anonymous posts.
    pub fn from_row(row: PostRow, viewer: Option<UserId>) -> Self {
        let liked_by_me = viewer
            .map(|me| row.likes.iter().any(|like| like.user_id == me))
            .unwrap_or(false);
        let author_name = display_name(row.is_anonymous, row.author_name.as_deref());
        let mut comments: Vec<Comment> = row.comments.into_iter().map(Comment::from).collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Self {
            id: row.id,
            body: row.body,
            category: row.category,
            is_anonymous: row.is_anonymous,
            author_id: row.author_id,
            author_name,
            created_at: row.created_at,
            like_count: u64::try_from(row.like_count).unwrap_or(0),
            liked_by_me,
            comments,
        }
    }

    pub fn is_authored_by(&self, user: UserId) -> bool {
        self.author_id == user
    }
}

pub fn display_name(is_anonymous: bool, profile_name: Option<&str>) -> String {
    if is_anonymous {
        return ANONYMOUS_NAME.to_string();
    }
    match profile_name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => UNKNOWN_AUTHOR_NAME.to_string(),
    }
}
