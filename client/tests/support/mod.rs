#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relatos_client::{
    ChangeStream, FeedConfig, FeedStore, Gateway, GatewayError, GatewayResult, MemoryBackend,
    MemoryGateway, MemoryStore,
};
use relatos_shared::{
    Affected, Collection, FeedQuery, LikeRow, NewComment, NewLike, NewPost, PostId, PostRow,
    UserId, Viewer,
};
use tokio::sync::{Notify, Semaphore};

pub fn viewer(id: UserId) -> Viewer {
    Viewer {
        id,
        email: format!("user{id}@relatos.test"),
    }
}

/// Wraps a memory gateway so individual operations can be paused after they
/// ran against the backend, or made to fail once.
pub struct GatedGateway {
    pub inner: MemoryGateway,
    paused: Mutex<HashSet<&'static str>>,
    failing: Mutex<HashSet<&'static str>>,
    entered: Notify,
    release: Semaphore,
}

impl GatedGateway {
    pub fn new(inner: MemoryGateway) -> Self {
        Self {
            inner,
            paused: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// The next call to `op` waits in [`release`](Self::release) once done.
    pub fn pause_next(&self, op: &'static str) {
        self.paused.lock().unwrap().insert(op);
    }

    pub fn fail_next(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("gated operation was never reached");
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    async fn checkpoint(&self, op: &'static str) -> GatewayResult<()> {
        if self.failing.lock().unwrap().remove(op) {
            return Err(GatewayError::Backend(format!("injected failure in {op}")));
        }
        let paused = self.paused.lock().unwrap().remove(op);
        if paused {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for GatedGateway {
    async fn viewer(&self) -> GatewayResult<Option<Viewer>> {
        self.inner.viewer().await
    }

    async fn query_posts(&self, query: &FeedQuery) -> GatewayResult<Vec<PostRow>> {
        let rows = self.inner.query_posts(query).await;
        self.checkpoint("query_posts").await?;
        rows
    }

    async fn count_posts(&self) -> GatewayResult<u64> {
        self.inner.count_posts().await
    }

    async fn find_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Option<LikeRow>> {
        let like = self.inner.find_like(post_id, user_id).await;
        self.checkpoint("find_like").await?;
        like
    }

    async fn insert_post(&self, post: &NewPost) -> GatewayResult<()> {
        self.checkpoint("insert_post").await?;
        self.inner.insert_post(post).await
    }

    async fn insert_like(&self, like: &NewLike) -> GatewayResult<()> {
        self.checkpoint("insert_like").await?;
        self.inner.insert_like(like).await
    }

    async fn insert_comment(&self, comment: &NewComment) -> GatewayResult<()> {
        self.checkpoint("insert_comment").await?;
        self.inner.insert_comment(comment).await
    }

    async fn delete_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Affected> {
        self.checkpoint("delete_like").await?;
        self.inner.delete_like(post_id, user_id).await
    }

    async fn delete_post(&self, post_id: PostId, author_id: UserId) -> GatewayResult<Affected> {
        self.checkpoint("delete_post").await?;
        self.inner.delete_post(post_id, author_id).await
    }

    async fn subscribe(&self, collection: Collection) -> GatewayResult<ChangeStream> {
        self.inner.subscribe(collection).await
    }
}

pub fn store_for(gateway: Arc<dyn Gateway>) -> FeedStore {
    FeedStore::new(gateway, Arc::new(MemoryStore::new()), FeedConfig::default())
}

pub fn gated(backend: &Arc<MemoryBackend>, viewer: Option<Viewer>) -> Arc<GatedGateway> {
    Arc::new(GatedGateway::new(backend.connect(viewer)))
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
