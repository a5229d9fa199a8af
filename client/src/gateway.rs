//! The boundary to the remote collection service.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use relatos_shared::{
    Affected, ChangeEvent, Collection, FeedQuery, LikeRow, NewComment, NewLike, NewPost, PostId,
    PostRow, UserId, Viewer,
};

use crate::error::GatewayError;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Asynchronous "something changed" notifications for one collection.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// Filtered query and mutation over posts, likes and comments, plus the
/// viewer identity of whoever holds this handle.
///
/// Inserts of a duplicate (post, user) like must fail with
/// [`GatewayError::Conflict`]. Deletes take the full composite predicate and
/// report how many rows matched.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn viewer(&self) -> GatewayResult<Option<Viewer>>;

    async fn query_posts(&self, query: &FeedQuery) -> GatewayResult<Vec<PostRow>>;

    async fn count_posts(&self) -> GatewayResult<u64>;

    async fn find_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Option<LikeRow>>;

    async fn insert_post(&self, post: &NewPost) -> GatewayResult<()>;

    async fn insert_like(&self, like: &NewLike) -> GatewayResult<()>;

    async fn insert_comment(&self, comment: &NewComment) -> GatewayResult<()>;

    async fn delete_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Affected>;

    async fn delete_post(&self, post_id: PostId, author_id: UserId) -> GatewayResult<Affected>;

    async fn subscribe(&self, collection: Collection) -> GatewayResult<ChangeStream>;
}
