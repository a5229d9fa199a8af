use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use relatos_api::{auth, db, router, AppState, DbPool};
use relatos_client::model::{ANONYMOUS_NAME, UNKNOWN_AUTHOR_NAME};
use relatos_client::{
    CommentId, FeedConfig, FeedError, FeedStore, Gateway, GatewayError, HttpGateway, LikeToggle,
    MemoryStore,
};
use relatos_shared::{Categories, FeedQuery, NewComment, NewLike, NewPost, Viewer};
use tempfile::TempDir;

const SECRET: &str = "test-secret";

struct TestServer {
    _dir: TempDir,
    pool: DbPool,
    base_url: String,
    server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = db::open_pool(dir.path().join("relatos.db")).expect("pool");
        db::run_migrations(&pool).expect("migrations");
        db::upsert_profile(&pool, 1, Some("marina")).expect("profile");

        let state = AppState::new(
            pool.clone(),
            SECRET.to_string(),
            Categories::default(),
            "http://localhost:3000".to_string(),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = router(state);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            _dir: dir,
            pool,
            base_url: format!("http://{addr}"),
            server,
        }
    }

    fn gateway(&self, user: Option<i64>) -> HttpGateway {
        let token = user.map(|id| {
            let viewer = Viewer {
                id,
                email: format!("user{id}@relatos.test"),
            };
            auth::issue_token(&viewer, SECRET, 3600).expect("token")
        });
        HttpGateway::new(self.base_url.clone(), token)
    }

    fn store(&self, user: Option<i64>) -> FeedStore {
        FeedStore::new(
            Arc::new(self.gateway(user)),
            Arc::new(MemoryStore::new()),
            FeedConfig::default(),
        )
    }

    fn count(&self, sql: &str) -> i64 {
        let conn = self.pool.get().expect("conn");
        conn.query_row(sql, [], |row| row.get(0)).expect("count")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn new_post(author: i64, category: &str, body: &str, is_anonymous: bool) -> NewPost {
    NewPost {
        body: body.into(),
        category: category.into(),
        is_anonymous,
        author_id: author,
    }
}

#[tokio::test]
async fn viewer_comes_from_the_bearer_token() {
    let server = TestServer::start().await;

    let viewer = server.gateway(Some(1)).viewer().await.unwrap();
    assert_eq!(viewer.map(|v| v.id), Some(1));
    assert_eq!(server.gateway(None).viewer().await.unwrap(), None);

    let forged = HttpGateway::new(server.base_url.clone(), Some("not-a-jwt".into()));
    assert_eq!(forged.viewer().await.unwrap(), None);
}

#[tokio::test]
async fn category_filter_over_http() {
    let server = TestServer::start().await;
    let writer = server.gateway(Some(1));
    for (category, body) in [
        ("Medo", "um"),
        ("Alívio", "dois"),
        ("Medo", "três"),
        ("Alívio", "quatro"),
        ("Medo", "cinco"),
    ] {
        writer.insert_post(&new_post(1, category, body, false)).await.unwrap();
    }

    let store = server.store(None);
    store.filter_by_categories(vec!["Medo".into()]).await;

    let posts = store.posts().await;
    let bodies: Vec<_> = posts.iter().map(|p| p.body.as_str()).collect();
    assert_eq!(bodies, ["cinco", "três", "um"]);
    assert!(posts.windows(2).all(|w| w[0].id > w[1].id));
}

#[tokio::test]
async fn display_names_over_http() {
    let server = TestServer::start().await;
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Segredo", "anônimo", true))
        .await
        .unwrap();
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "assinado", false))
        .await
        .unwrap();
    server
        .gateway(Some(2))
        .insert_post(&new_post(2, "Medo", "sem perfil", false))
        .await
        .unwrap();

    let store = server.store(None);
    store.fetch_feed().await;
    let names: Vec<_> = store
        .posts()
        .await
        .into_iter()
        .map(|p| (p.body, p.author_name))
        .collect();
    assert_eq!(
        names,
        vec![
            ("sem perfil".to_string(), UNKNOWN_AUTHOR_NAME.to_string()),
            ("assinado".to_string(), "marina".to_string()),
            ("anônimo".to_string(), ANONYMOUS_NAME.to_string()),
        ]
    );
}

#[tokio::test]
async fn duplicate_like_is_reported_as_conflict() {
    let server = TestServer::start().await;
    let gateway = server.gateway(Some(2));
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "escuro", false))
        .await
        .unwrap();

    let like = NewLike { post_id: 1, user_id: 2 };
    gateway.insert_like(&like).await.unwrap();
    let err = gateway.insert_like(&like).await.unwrap_err();
    assert!(err.is_conflict(), "unexpected {err:?}");
    assert_eq!(server.count("SELECT COUNT(*) FROM likes"), 1);
}

#[tokio::test]
async fn toggle_like_round_trip() {
    let server = TestServer::start().await;
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "escuro", false))
        .await
        .unwrap();

    let store = server.store(Some(2));
    assert_eq!(store.toggle_like(1).await.unwrap(), Some(LikeToggle::Liked));
    let post = store.post(1).await.unwrap();
    assert_eq!(post.like_count, 1);
    assert!(post.liked_by_me);

    assert_eq!(store.toggle_like(1).await.unwrap(), Some(LikeToggle::Unliked));
    assert_eq!(store.post(1).await.unwrap().like_count, 0);
    assert_eq!(server.count("SELECT COUNT(*) FROM likes"), 0);
}

#[tokio::test]
async fn like_rows_of_other_users_are_forbidden() {
    let server = TestServer::start().await;
    let gateway = server.gateway(Some(2));
    let err = gateway
        .query_posts(&FeedQuery {
            with_likes_of: Some(1),
            ..FeedQuery::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Forbidden);
}

#[tokio::test]
async fn only_the_author_deletes() {
    let server = TestServer::start().await;
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "meu", false))
        .await
        .unwrap();

    // The intruder never fetched, so only the server predicate stands guard.
    let intruder = server.store(Some(2));
    intruder.delete_story(1).await.unwrap();
    assert_eq!(server.count("SELECT COUNT(*) FROM posts"), 1);
    assert!(intruder.post(1).await.is_some());

    let raw = server.gateway(Some(2));
    assert_eq!(raw.delete_post(1, 1).await.unwrap().affected, 0);
    assert_eq!(server.count("SELECT COUNT(*) FROM posts"), 1);

    let author = server.store(Some(1));
    author.fetch_feed().await;
    author.delete_story(1).await.unwrap();
    assert_eq!(server.count("SELECT COUNT(*) FROM posts"), 0);
    assert!(author.posts().await.is_empty());
}

#[tokio::test]
async fn deleting_a_post_removes_its_likes_and_comments() {
    let server = TestServer::start().await;
    let author = server.gateway(Some(1));
    author.insert_post(&new_post(1, "Medo", "meu", false)).await.unwrap();
    author.insert_like(&NewLike { post_id: 1, user_id: 1 }).await.unwrap();
    author
        .insert_comment(&NewComment {
            post_id: 1,
            author_id: 1,
            body: "nota".into(),
        })
        .await
        .unwrap();

    assert_eq!(author.delete_post(1, 1).await.unwrap().affected, 1);
    assert_eq!(server.count("SELECT COUNT(*) FROM likes"), 0);
    assert_eq!(server.count("SELECT COUNT(*) FROM comments"), 0);
}

#[tokio::test]
async fn comments_are_bounded_and_replace_placeholders() {
    let server = TestServer::start().await;
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "escuro", false))
        .await
        .unwrap();
    let store = server.store(Some(2));
    store.fetch_feed().await;

    let too_long = "a".repeat(601);
    let err = store.add_comment(1, &too_long).await.unwrap_err();
    assert!(matches!(err, FeedError::Gateway(GatewayError::Rejected(_))), "unexpected {err:?}");
    assert!(store.post(1).await.unwrap().comments.is_empty());

    store.add_comment(1, "você não está só").await.unwrap();
    let comments = store.post(1).await.unwrap().comments;
    assert_eq!(comments.len(), 1);
    assert!(matches!(comments[0].id, CommentId::Server(_)));
    assert_eq!(comments[0].body, "você não está só");
}

#[tokio::test]
async fn unknown_category_is_rejected() {
    let server = TestServer::start().await;
    let store = server.store(Some(1));
    let err = store.add_post("oi", "Tédio", false).await.unwrap_err();
    assert!(matches!(err, FeedError::Gateway(GatewayError::Rejected(_))), "unexpected {err:?}");
    assert_eq!(server.count("SELECT COUNT(*) FROM posts"), 0);
}

#[tokio::test]
async fn insert_as_someone_else_is_forbidden() {
    let server = TestServer::start().await;
    let err = server
        .gateway(Some(2))
        .insert_post(&new_post(1, "Medo", "falso", false))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Forbidden);
}

#[tokio::test]
async fn random_post_over_http() {
    let server = TestServer::start().await;
    let store = server.store(None);
    assert_eq!(store.get_random_post().await.unwrap(), None);

    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "único", false))
        .await
        .unwrap();
    let post = store.get_random_post().await.unwrap().expect("one post");
    assert_eq!(post.body, "único");
}

#[tokio::test]
async fn pushed_changes_refresh_an_open_store() {
    let server = TestServer::start().await;
    let store = FeedStore::open(
        Arc::new(server.gateway(Some(2))),
        Arc::new(MemoryStore::new()),
        FeedConfig::default(),
    )
    .await;
    assert!(store.is_watching());

    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Saudade", "de longe", false))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.posts().await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "no refresh after change");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.posts().await[0].body, "de longe");
    store.shutdown();
}

#[tokio::test]
async fn raw_requests_without_a_token() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let health = http
        .get(format!("{}/api/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let created = http
        .post(format!("{}/api/posts", server.base_url))
        .json(&new_post(1, "Medo", "sem token", false))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), reqwest::StatusCode::UNAUTHORIZED);

    let count: serde_json::Value = http
        .get(format!("{}/api/posts/count", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count, serde_json::json!({ "count": 0 }));
}

#[tokio::test]
async fn bodies_come_back_exactly_as_written() {
    let server = TestServer::start().await;
    let store = server.store(Some(1));

    store.add_post("eu & ela <3", "Segredo", false).await.unwrap();
    let post_id = store.posts().await[0].id;
    assert_eq!(store.posts().await[0].body, "eu & ela <3");

    store.add_comment(post_id, "a < b & c").await.unwrap();
    store.add_comment(post_id, "<script>x</script>").await.unwrap();

    let comments = store.post(post_id).await.unwrap().comments;
    let bodies: Vec<_> = comments.iter().map(|c| c.body.as_str()).collect();
    assert_eq!(bodies, ["a < b & c", "<script>x</script>"]);
    assert!(comments.iter().all(|c| !c.id.is_pending()));
}

#[tokio::test]
async fn comment_length_counts_characters_not_bytes() {
    let server = TestServer::start().await;
    server
        .gateway(Some(1))
        .insert_post(&new_post(1, "Medo", "escuro", false))
        .await
        .unwrap();
    let gateway = server.gateway(Some(1));

    let at_limit = "ç".repeat(600);
    gateway
        .insert_comment(&NewComment {
            post_id: 1,
            author_id: 1,
            body: at_limit,
        })
        .await
        .unwrap();

    let blank = gateway
        .insert_comment(&NewComment {
            post_id: 1,
            author_id: 1,
            body: "   ".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(blank, GatewayError::Rejected(_)), "unexpected {blank:?}");
    assert_eq!(server.count("SELECT COUNT(*) FROM comments"), 1);
}
