//! Reference gateway for relatos: posts, likes and comments over SQLite,
//! bearer-token identity and a server-sent change stream.

pub mod auth;
pub mod changes;
pub mod comments;
pub mod config;
pub mod db;
pub mod likes;
pub mod posts;

use axum::{
    routing::{delete, get},
    Router,
};
use relatos_shared::{Categories, ChangeEvent, Collection};
use tokio::sync::broadcast;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub jwt_secret: String,
    pub categories: Categories,
    pub cors_origin: String,
    pub changes: broadcast::Sender<ChangeEvent>,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: String, categories: Categories, cors_origin: String) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            db,
            jwt_secret,
            categories,
            cors_origin,
            changes,
        }
    }

    /// Tells every subscriber that `collection` changed.
    pub fn publish(&self, collection: Collection) {
        // No subscribers is fine.
        let _ = self.changes.send(ChangeEvent::new(collection));
    }
}

pub fn router(state: AppState) -> Router {
    let origin = state
        .cors_origin
        .parse::<axum::http::HeaderValue>()
        .map(AllowOrigin::exact)
        .unwrap_or_else(|_| {
            tracing::warn!(origin = %state.cors_origin, "invalid CORS origin, allowing any");
            AllowOrigin::any()
        });
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::any())
        .allow_headers(AllowHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "ok" }))
        // Auth
        .route("/api/auth/me", get(auth::me))
        // Posts
        .route(
            "/api/posts",
            get(posts::list_posts).post(posts::create_post),
        )
        .route("/api/posts/count", get(posts::count_posts))
        .route("/api/posts/{id}", delete(posts::delete_post))
        // Likes
        .route(
            "/api/likes",
            get(likes::find_like)
                .post(likes::create_like)
                .delete(likes::delete_like),
        )
        // Comments
        .route("/api/comments", axum::routing::post(comments::create_comment))
        // Change notifications
        .route("/api/changes", get(changes::stream_changes))
        .layer(cors)
        .with_state(state)
}

/// Installs a global tracing subscriber honoring `RUST_LOG`. Later calls
/// are no-ops.
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("relatos_api=info,tower_http=info"));
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
