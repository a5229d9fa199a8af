//! In-process gateway. Several handles share one backend, each with its own
//! signed-in viewer, so multi-client behavior can be exercised offline.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::stream;
use relatos_shared::{
    Affected, ChangeEvent, Collection, CommentRow, FeedQuery, LikeRow, NewComment, NewLike,
    NewPost, PostId, PostRow, UserId, Viewer,
};
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::gateway::{ChangeStream, Gateway, GatewayResult};

struct PostRecord {
    body: String,
    category: String,
    is_anonymous: bool,
    author_id: UserId,
    created_at: String,
}

#[derive(Default)]
struct Tables {
    posts: BTreeMap<PostId, PostRecord>,
    likes: BTreeMap<(PostId, UserId), String>,
    comments: Vec<CommentRow>,
    profiles: HashMap<UserId, String>,
    next_post_id: PostId,
    next_comment_id: i64,
}

/// Shared storage behind any number of [`MemoryGateway`] handles.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    changes: Mutex<broadcast::Sender<ChangeEvent>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(64);
        Arc::new(Self {
            tables: Mutex::new(Tables {
                next_post_id: 1,
                next_comment_id: 1,
                ..Tables::default()
            }),
            changes: Mutex::new(changes),
        })
    }

    /// Ends every open change stream, as a restarted server would. Later
    /// subscriptions work normally.
    pub fn disconnect_subscribers(&self) {
        let (fresh, _) = broadcast::channel(64);
        *self.changes.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    /// A handle acting as `viewer` (or anonymously).
    pub fn connect(self: &Arc<Self>, viewer: Option<Viewer>) -> MemoryGateway {
        MemoryGateway {
            backend: Arc::clone(self),
            viewer: RwLock::new(viewer),
        }
    }

    pub fn set_profile(&self, user: UserId, username: &str) {
        self.tables().profiles.insert(user, username.to_string());
    }

    /// Inserts a post directly and returns its id, bypassing identity checks.
    pub fn seed_post(&self, author: UserId, category: &str, body: &str, is_anonymous: bool) -> PostId {
        let id = {
            let mut tables = self.tables();
            let id = tables.next_post_id;
            tables.next_post_id += 1;
            tables.posts.insert(
                id,
                PostRecord {
                    body: body.to_string(),
                    category: category.to_string(),
                    is_anonymous,
                    author_id: author,
                    created_at: timestamp(),
                },
            );
            id
        };
        self.notify(Collection::Posts);
        id
    }

    pub fn post_count(&self) -> usize {
        self.tables().posts.len()
    }

    pub fn like_count(&self, post_id: PostId) -> usize {
        self.tables()
            .likes
            .keys()
            .filter(|(post, _)| *post == post_id)
            .count()
    }

    pub fn comment_count(&self, post_id: PostId) -> usize {
        self.tables()
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .count()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, collection: Collection) {
        // No receivers is fine.
        let _ = self
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(ChangeEvent::new(collection));
    }

    fn select_posts(&self, query: &FeedQuery) -> Vec<PostRow> {
        let tables = self.tables();
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        tables
            .posts
            .iter()
            .rev()
            .filter(|(_, post)| {
                query.categories.is_empty() || query.categories.iter().any(|c| *c == post.category)
            })
            .filter(|(id, _)| match query.only_liked_by {
                Some(user) => tables.likes.contains_key(&(**id, user)),
                None => true,
            })
            .skip(offset)
            .take(limit)
            .map(|(id, post)| {
                let like_count = tables.likes.keys().filter(|(p, _)| p == id).count() as i64;
                let likes = query
                    .with_likes_of
                    .and_then(|user| {
                        tables.likes.get(&(*id, user)).map(|created_at| LikeRow {
                            post_id: *id,
                            user_id: user,
                            created_at: created_at.clone(),
                        })
                    })
                    .into_iter()
                    .collect();
                let comments = tables
                    .comments
                    .iter()
                    .filter(|c| c.post_id == *id)
                    .cloned()
                    .collect();
                PostRow {
                    id: *id,
                    body: post.body.clone(),
                    category: post.category.clone(),
                    is_anonymous: post.is_anonymous,
                    author_id: post.author_id,
                    author_name: tables.profiles.get(&post.author_id).cloned(),
                    created_at: post.created_at.clone(),
                    like_count,
                    likes,
                    comments,
                }
            })
            .collect()
    }
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct MemoryGateway {
    backend: Arc<MemoryBackend>,
    viewer: RwLock<Option<Viewer>>,
}

impl MemoryGateway {
    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    pub fn sign_in(&self, viewer: Viewer) {
        *self.viewer.write().unwrap_or_else(PoisonError::into_inner) = Some(viewer);
    }

    pub fn sign_out(&self) {
        *self.viewer.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn current(&self) -> Option<Viewer> {
        self.viewer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The signed-in viewer must be the user named in the record.
    fn authorize(&self, user: UserId) -> GatewayResult<()> {
        match self.current() {
            Some(viewer) if viewer.id == user => Ok(()),
            Some(_) => Err(GatewayError::Forbidden),
            None => Err(GatewayError::Unauthorized),
        }
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn viewer(&self) -> GatewayResult<Option<Viewer>> {
        Ok(self.current())
    }

    async fn query_posts(&self, query: &FeedQuery) -> GatewayResult<Vec<PostRow>> {
        Ok(self.backend.select_posts(query))
    }

    async fn count_posts(&self) -> GatewayResult<u64> {
        Ok(self.backend.post_count() as u64)
    }

    async fn find_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Option<LikeRow>> {
        let tables = self.backend.tables();
        Ok(tables.likes.get(&(post_id, user_id)).map(|created_at| LikeRow {
            post_id,
            user_id,
            created_at: created_at.clone(),
        }))
    }

    async fn insert_post(&self, post: &NewPost) -> GatewayResult<()> {
        self.authorize(post.author_id)?;
        if post.body.trim().is_empty() {
            return Err(GatewayError::Rejected("empty body".into()));
        }
        self.backend
            .seed_post(post.author_id, &post.category, &post.body, post.is_anonymous);
        Ok(())
    }

    async fn insert_like(&self, like: &NewLike) -> GatewayResult<()> {
        self.authorize(like.user_id)?;
        {
            let mut tables = self.backend.tables();
            if !tables.posts.contains_key(&like.post_id) {
                return Err(GatewayError::NotFound);
            }
            let key = (like.post_id, like.user_id);
            if tables.likes.contains_key(&key) {
                return Err(GatewayError::Conflict(format!(
                    "like ({}, {}) already exists",
                    like.post_id, like.user_id
                )));
            }
            tables.likes.insert(key, timestamp());
        }
        self.backend.notify(Collection::Likes);
        Ok(())
    }

    async fn insert_comment(&self, comment: &NewComment) -> GatewayResult<()> {
        self.authorize(comment.author_id)?;
        {
            let mut tables = self.backend.tables();
            if !tables.posts.contains_key(&comment.post_id) {
                return Err(GatewayError::NotFound);
            }
            let id = tables.next_comment_id;
            tables.next_comment_id += 1;
            tables.comments.push(CommentRow {
                id,
                post_id: comment.post_id,
                author_id: comment.author_id,
                body: comment.body.clone(),
                created_at: timestamp(),
            });
        }
        self.backend.notify(Collection::Comments);
        Ok(())
    }

    async fn delete_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Affected> {
        self.authorize(user_id)?;
        let removed = self.backend.tables().likes.remove(&(post_id, user_id)).is_some();
        if removed {
            self.backend.notify(Collection::Likes);
        }
        Ok(Affected {
            affected: u64::from(removed),
        })
    }

    async fn delete_post(&self, post_id: PostId, author_id: UserId) -> GatewayResult<Affected> {
        // A caller naming someone else gets zero rows, like the SQL predicate.
        let Some(viewer) = self.current() else {
            return Err(GatewayError::Unauthorized);
        };
        let removed = {
            let mut tables = self.backend.tables();
            let owned = tables
                .posts
                .get(&post_id)
                .is_some_and(|post| post.author_id == author_id && author_id == viewer.id);
            if owned {
                tables.posts.remove(&post_id);
                tables.likes.retain(|(post, _), _| *post != post_id);
                tables.comments.retain(|c| c.post_id != post_id);
            }
            owned
        };
        if removed {
            self.backend.notify(Collection::Posts);
        }
        Ok(Affected {
            affected: u64::from(removed),
        })
    }

    async fn subscribe(&self, collection: Collection) -> GatewayResult<ChangeStream> {
        let rx = self
            .backend
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();
        let events = stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.collection == collection => return Some((event, rx)),
                    Ok(_) => continue,
                    // Missed events still mean something changed.
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        return Some((ChangeEvent::new(collection), rx))
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(events))
    }
}
