//! The feed store: canonical post list, filters, optimistic mutations and
//! reconciliation with the gateway.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures_util::stream::{self, SelectAll, StreamExt};
use rand::Rng;
use relatos_shared::{
    Categories, Collection, FeedQuery, FilterState, NewComment, NewLike, NewPost, PostId, Viewer,
};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{FeedConfig, MAX_RESUBSCRIBE_DELAY};
use crate::error::{FeedError, FeedResult, GatewayError};
use crate::gateway::{ChangeStream, Gateway};
use crate::lock::InFlight;
use crate::model::{Comment, FeedPost};
use crate::persistence::{FilterPersistence, KeyValueStore};

/// Result of a like toggle that actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeToggle {
    Liked,
    Unliked,
}

pub struct FeedStore {
    gateway: Arc<dyn Gateway>,
    persistence: FilterPersistence,
    config: FeedConfig,
    posts: RwLock<Vec<FeedPost>>,
    filters: RwLock<FilterState>,
    fetches_in_flight: AtomicUsize,
    /// Latest fetch token issued. Optimistic writes also bump it so that a
    /// fetch started before them cannot overwrite them.
    fetch_seq: AtomicU64,
    likes_in_flight: InFlight<PostId>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl FeedStore {
    /// Builds a store with filters restored from `storage`. Nothing is
    /// fetched until [`fetch_feed`](Self::fetch_feed) is called.
    pub fn new(gateway: Arc<dyn Gateway>, storage: Arc<dyn KeyValueStore>, config: FeedConfig) -> Self {
        let persistence = FilterPersistence::new(storage, config.storage_key.clone());
        let filters = persistence.load();
        Self {
            gateway,
            persistence,
            config,
            posts: RwLock::new(Vec::new()),
            filters: RwLock::new(filters),
            fetches_in_flight: AtomicUsize::new(0),
            fetch_seq: AtomicU64::new(0),
            likes_in_flight: InFlight::new(),
            subscription: Mutex::new(None),
        }
    }

    /// Builds a store, subscribes to change notifications for posts, likes
    /// and comments, and performs the first fetch.
    pub async fn open(
        gateway: Arc<dyn Gateway>,
        storage: Arc<dyn KeyValueStore>,
        config: FeedConfig,
    ) -> Arc<Self> {
        let store = Arc::new(Self::new(gateway, storage, config));
        store.watch_changes().await;
        store.fetch_feed().await;
        store
    }

    /// Stops listening for change notifications.
    pub fn shutdown(&self) {
        let handle = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("feed change subscription stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // ── Reads ──

    pub async fn posts(&self) -> Vec<FeedPost> {
        self.posts.read().await.clone()
    }

    pub async fn post(&self, post_id: PostId) -> Option<FeedPost> {
        self.posts
            .read()
            .await
            .iter()
            .find(|post| post.id == post_id)
            .cloned()
    }

    pub async fn filters(&self) -> FilterState {
        self.filters.read().await.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.fetches_in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn categories(&self) -> &Categories {
        &self.config.categories
    }

    // ── Canonical refresh ──

    /// Re-runs the filtered query and replaces the post list wholesale.
    /// Failures are logged and leave the current list in place.
    pub async fn fetch_feed(&self) {
        let token = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let _loading = LoadingGuard::enter(&self.fetches_in_flight);

        match self.load_posts().await {
            Ok(posts) => {
                let mut current = self.posts.write().await;
                let latest = self.fetch_seq.load(Ordering::SeqCst);
                if latest != token {
                    debug!(token, latest, "discarding superseded feed result");
                    return;
                }
                debug!(token, count = posts.len(), "feed replaced");
                *current = posts;
            }
            Err(err) => error!(error = %err, "failed to fetch feed"),
        }
    }

    async fn load_posts(&self) -> FeedResult<Vec<FeedPost>> {
        let filters = self.filters().await;
        let viewer = self.call(self.gateway.viewer()).await?;
        let viewer_id = viewer.as_ref().map(|v| v.id);

        if filters.show_liked && viewer_id.is_none() {
            // Nobody to have liked anything.
            return Ok(Vec::new());
        }

        let query = FeedQuery {
            categories: filters.categories.clone(),
            only_liked_by: viewer_id.filter(|_| filters.show_liked),
            with_likes_of: viewer_id,
            ..FeedQuery::default()
        };
        let rows = self.call(self.gateway.query_posts(&query)).await?;

        let mut posts: Vec<FeedPost> = rows
            .into_iter()
            .map(|row| FeedPost::from_row(row, viewer_id))
            .collect();
        if filters.show_liked {
            posts.retain(|post| post.liked_by_me);
        }
        posts.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(posts)
    }

    // ── Mutations ──

    pub async fn add_post(&self, body: &str, category: &str, is_anonymous: bool) -> FeedResult<()> {
        let viewer = self.require_viewer().await?;
        if body.trim().is_empty() {
            return Err(FeedError::InvalidInput("post body is empty"));
        }

        let post = NewPost {
            body: body.to_string(),
            category: category.to_string(),
            is_anonymous,
            author_id: viewer.id,
        };
        self.call(self.gateway.insert_post(&post)).await?;
        info!(author = viewer.id, category, "post created");
        self.fetch_feed().await;
        Ok(())
    }

    /// Likes or unlikes `post_id` for the viewer. Returns `Ok(None)` when no
    /// viewer is signed in or a toggle for the same post is already running.
    pub async fn toggle_like(&self, post_id: PostId) -> FeedResult<Option<LikeToggle>> {
        let Some(guard) = self.likes_in_flight.try_acquire(post_id) else {
            debug!(post_id, "like toggle already in flight");
            return Ok(None);
        };
        let Some(viewer) = self.call(self.gateway.viewer()).await? else {
            return Ok(None);
        };

        let existing = self.call(self.gateway.find_like(post_id, viewer.id)).await?;
        let outcome = match existing {
            Some(_) => {
                self.call(self.gateway.delete_like(post_id, viewer.id)).await?;
                LikeToggle::Unliked
            }
            None => {
                let like = NewLike {
                    post_id,
                    user_id: viewer.id,
                };
                match self.call(self.gateway.insert_like(&like)).await {
                    Ok(()) => {}
                    Err(err) if err.is_conflict() => {
                        debug!(post_id, "like already present, treating insert as done");
                    }
                    Err(err) => return Err(err),
                }
                LikeToggle::Liked
            }
        };
        drop(guard);

        self.fetch_feed().await;
        Ok(Some(outcome))
    }

    /// Appends a placeholder comment at once, then inserts it and refreshes.
    /// The refresh runs whether or not the insert succeeded.
    pub async fn add_comment(&self, post_id: PostId, body: &str) -> FeedResult<()> {
        let viewer = self.require_viewer().await?;
        if body.trim().is_empty() {
            return Err(FeedError::InvalidInput("comment body is empty"));
        }

        let placeholder = Comment::pending(post_id, viewer.id, body);
        {
            let mut posts = self.posts.write().await;
            if let Some(post) = posts.iter_mut().find(|post| post.id == post_id) {
                post.comments.push(placeholder);
            }
            self.fetch_seq.fetch_add(1, Ordering::SeqCst);
        }

        let comment = NewComment {
            post_id,
            author_id: viewer.id,
            body: body.to_string(),
        };
        let result = self.call(self.gateway.insert_comment(&comment)).await;
        if let Err(err) = &result {
            warn!(post_id, error = %err, "comment insert failed, dropping placeholder");
        }
        self.fetch_feed().await;
        result
    }

    /// Deletes one of the viewer's own posts. The post leaves the local list
    /// before the gateway answers; a failed or empty delete is corrected by a
    /// canonical refresh.
    pub async fn delete_story(&self, post_id: PostId) -> FeedResult<()> {
        let viewer = self.require_viewer().await?;
        {
            let mut posts = self.posts.write().await;
            if let Some(post) = posts.iter().find(|post| post.id == post_id) {
                if !post.is_authored_by(viewer.id) {
                    return Err(FeedError::NotAuthor);
                }
            }
            posts.retain(|post| post.id != post_id);
            self.fetch_seq.fetch_add(1, Ordering::SeqCst);
        }

        match self.call(self.gateway.delete_post(post_id, viewer.id)).await {
            Ok(outcome) if outcome.affected == 0 => {
                warn!(post_id, "delete matched no rows");
                self.fetch_feed().await;
                Ok(())
            }
            Ok(_) => {
                info!(post_id, "post deleted");
                Ok(())
            }
            Err(err) => {
                self.fetch_feed().await;
                Err(err)
            }
        }
    }

    /// Picks one post uniformly at random from the whole corpus, ignoring
    /// the active filters.
    pub async fn get_random_post(&self) -> FeedResult<Option<FeedPost>> {
        let count = self.call(self.gateway.count_posts()).await?;
        if count == 0 {
            return Ok(None);
        }
        let offset = rand::thread_rng().gen_range(0..count);

        let viewer_id = self.call(self.gateway.viewer()).await?.map(|v| v.id);
        let query = FeedQuery {
            with_likes_of: viewer_id,
            ..FeedQuery::single_at(offset)
        };
        let row = self
            .call(self.gateway.query_posts(&query))
            .await?
            .into_iter()
            .next();
        Ok(row.map(|row| FeedPost::from_row(row, viewer_id)))
    }

    // ── Filters ──

    pub async fn filter_by_categories(&self, categories: Vec<String>) {
        self.update_filters(|filters| filters.categories = categories).await;
    }

    pub async fn toggle_liked_filter(&self) {
        self.update_filters(|filters| filters.show_liked = !filters.show_liked)
            .await;
    }

    async fn update_filters(&self, change: impl FnOnce(&mut FilterState)) {
        let snapshot = {
            let mut filters = self.filters.write().await;
            change(&mut filters);
            filters.clone()
        };
        self.persistence.save(&snapshot);
        self.fetch_feed().await;
    }

    // ── Helpers ──

    async fn require_viewer(&self) -> FeedResult<Viewer> {
        self.call(self.gateway.viewer())
            .await?
            .ok_or(FeedError::Unauthenticated)
    }

    /// Runs one gateway call under the configured time budget.
    async fn call<T>(&self, fut: impl Future<Output = Result<T, GatewayError>>) -> FeedResult<T> {
        let budget = self.config.request_timeout;
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result.map_err(|err| FeedError::from_gateway(err, budget)),
            Err(_) => Err(FeedError::Timeout(budget)),
        }
    }

    /// Subscribes to every collection, then keeps a watcher task alive for
    /// as long as the store. Ended streams are resubscribed with backoff.
    async fn watch_changes(self: &Arc<Self>) {
        let initial = self.subscribe_all().await;
        let handle = tokio::spawn(Self::run_watcher(Arc::downgrade(self), initial));

        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn subscribe_all(&self) -> Option<SelectAll<ChangeStream>> {
        let mut streams = Vec::new();
        for collection in Collection::ALL {
            match self.call(self.gateway.subscribe(collection)).await {
                Ok(events) => streams.push(events),
                Err(err) => warn!(
                    collection = collection.as_str(),
                    error = %err,
                    "change notifications unavailable"
                ),
            }
        }
        (!streams.is_empty()).then(|| stream::select_all(streams))
    }

    async fn run_watcher(store: Weak<Self>, mut events: Option<SelectAll<ChangeStream>>) {
        let Some(base_delay) = store.upgrade().map(|s| s.config.resubscribe_delay) else {
            return;
        };
        let mut delay = base_delay;
        loop {
            if let Some(mut merged) = events.take() {
                while let Some(event) = merged.next().await {
                    let Some(store) = store.upgrade() else { return };
                    debug!(collection = event.collection.as_str(), "change notification");
                    store.fetch_feed().await;
                    delay = base_delay;
                }
                warn!(retry_in = ?delay, "change streams ended");
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);

            let Some(strong) = store.upgrade() else { return };
            events = strong.subscribe_all().await;
            if events.is_some() {
                info!("change notifications resubscribed");
                // Whatever happened while disconnected is only visible through a refetch.
                strong.fetch_feed().await;
            }
        }
    }
}

impl Drop for FeedStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counts a fetch as in flight for as long as it lives.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
