use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type PostId = i64;

/// Maximum length of a comment body, in characters.
pub const MAX_COMMENT_CHARS: usize = 600;

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Medo",
    "Alívio",
    "Vergonha",
    "Culpa",
    "Saudade",
    "Raiva",
    "Arrependimento",
    "Segredo",
];

// ── Auth ──

/// The identity performing requests, as reported by the auth boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: UserId,
    pub email: String,
}

// ── Posts ──

/// A post as returned by the gateway, with its joins already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRow {
    pub id: PostId,
    pub body: String,
    pub category: String,
    pub is_anonymous: bool,
    pub author_id: UserId,
    /// Profile name of the author, when one exists.
    pub author_name: Option<String>,
    pub created_at: String,
    pub like_count: i64,
    /// Like rows joined for the user named in `FeedQuery::with_likes_of`.
    #[serde(default)]
    pub likes: Vec<LikeRow>,
    #[serde(default)]
    pub comments: Vec<CommentRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub body: String,
    pub category: String,
    pub is_anonymous: bool,
    pub author_id: UserId,
}

/// Filtered read over the post collection. Rows always come back newest
/// (highest id) first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedQuery {
    /// Set-membership filter on the category label; empty means all.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Keep only posts liked by this user.
    pub only_liked_by: Option<UserId>,
    /// Join the like rows of this user into `PostRow::likes`.
    pub with_likes_of: Option<UserId>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl FeedQuery {
    /// A query for exactly the row at `offset` in display order.
    pub fn single_at(offset: u64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCount {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affected {
    pub affected: u64,
}

// ── Likes ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeRow {
    pub post_id: PostId,
    pub user_id: UserId,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLike {
    pub post_id: PostId,
    pub user_id: UserId,
}

// ── Comments ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: i64,
    pub post_id: PostId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: UserId,
    pub body: String,
}

// ── Change notifications ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Posts,
    Likes,
    Comments,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Posts, Collection::Likes, Collection::Comments];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Posts => "posts",
            Collection::Likes => "likes",
            Collection::Comments => "comments",
        }
    }
}

/// "Something changed" in a collection. Carries no diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
}

impl ChangeEvent {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }
}

// ── Filters ──

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, rename = "showLiked")]
    pub show_liked: bool,
}

// ── Categories ──

/// Closed, ordered set of category labels. Labels compare case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categories {
    labels: Vec<String>,
}

impl Categories {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            let label = label.trim();
            if !label.is_empty() && !out.iter().any(|l| l == label) {
                out.push(label.to_string());
            }
        }
        Self { labels: out }
    }

    /// Parse a comma separated list, e.g. from an environment variable.
    pub fn parse_list(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Default for Categories {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORIES.iter().copied())
    }
}
