use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use relatos_shared::*;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use tracing::{error, info};

use crate::{auth, AppState};

// ── Query params ──

#[derive(Deserialize)]
pub struct PostListParams {
    /// Comma separated labels.
    categories: Option<String>,
    only_liked_by: Option<i64>,
    with_likes_of: Option<i64>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl PostListParams {
    fn into_query(self) -> FeedQuery {
        let categories = self
            .categories
            .map(|raw| Categories::parse_list(&raw).labels().to_vec())
            .unwrap_or_default();
        FeedQuery {
            categories,
            only_liked_by: self.only_liked_by,
            with_likes_of: self.with_likes_of,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[derive(Deserialize)]
pub struct DeleteParams {
    author_id: i64,
}

// ── Handlers ──

/// GET /api/posts?categories=Medo,Culpa&with_likes_of=7
pub async fn list_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PostListParams>,
) -> Result<Json<Vec<PostRow>>, StatusCode> {
    let query = params.into_query();

    // Like rows are only handed out to their owner.
    let viewer = auth::extract_user_id(&headers, &state.jwt_secret).ok();
    for user in [query.only_liked_by, query.with_likes_of].into_iter().flatten() {
        if Some(user) != viewer {
            return Err(StatusCode::FORBIDDEN);
        }
    }

    let pool = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        select_posts(&conn, &query).map_err(|e| {
            error!(error = %e, "post query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(rows))
}

/// GET /api/posts/count
pub async fn count_posts(State(state): State<AppState>) -> Result<Json<RowCount>, StatusCode> {
    let pool = state.db.clone();

    let count = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get::<_, i64>(0))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(RowCount {
        count: count.max(0) as u64,
    }))
}

/// POST /api/posts
pub async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewPost>,
) -> Result<StatusCode, StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    if payload.author_id != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    // Stored verbatim; escaping belongs to whatever renders it.
    let body = payload.body.clone();
    if body.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if !state.categories.contains(&payload.category) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let pool = state.db.clone();
    let category = payload.category.clone();
    let is_anonymous = payload.is_anonymous;

    let id = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "INSERT INTO posts (user_id, body, category, is_anonymous) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_id, body, category, is_anonymous],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>(conn.last_insert_rowid())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    info!(post_id = id, author = user_id, "post created");
    state.publish(Collection::Posts);
    Ok(StatusCode::CREATED)
}

/// DELETE /api/posts/{id}?author_id=..
pub async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Affected>, StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    if params.author_id != user_id {
        // Someone else's predicate matches nothing.
        return Ok(Json(Affected { affected: 0 }));
    }

    let pool = state.db.clone();
    let affected = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "DELETE FROM posts WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![id, user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if affected > 0 {
        info!(post_id = id, "post deleted");
        state.publish(Collection::Posts);
    }
    Ok(Json(Affected {
        affected: affected as u64,
    }))
}

// ── Query ──

/// Runs a feed query: posts newest first with author name, like count,
/// comments and, when asked, one user's like rows.
pub fn select_posts(conn: &Connection, query: &FeedQuery) -> rusqlite::Result<Vec<PostRow>> {
    let mut sql = String::from(
        "SELECT p.id, p.body, p.category, p.is_anonymous, p.user_id, u.username, p.created_at,
                (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id)
         FROM posts p
         LEFT JOIN users u ON u.id = p.user_id
         WHERE 1 = 1",
    );
    let mut args: Vec<Value> = Vec::new();

    if !query.categories.is_empty() {
        let marks = vec!["?"; query.categories.len()].join(", ");
        sql.push_str(&format!(" AND p.category IN ({marks})"));
        args.extend(query.categories.iter().cloned().map(Value::Text));
    }
    if let Some(user) = query.only_liked_by {
        sql.push_str(" AND EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?)");
        args.push(Value::Integer(user));
    }
    sql.push_str(" ORDER BY p.id DESC");
    if query.limit.is_some() || query.offset.is_some() {
        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(Value::Integer(query.limit.map(|l| l as i64).unwrap_or(-1)));
        args.push(Value::Integer(query.offset.unwrap_or(0) as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut posts = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            Ok(PostRow {
                id: row.get(0)?,
                body: row.get(1)?,
                category: row.get(2)?,
                is_anonymous: row.get(3)?,
                author_id: row.get(4)?,
                author_name: row.get(5)?,
                created_at: row.get(6)?,
                like_count: row.get(7)?,
                likes: Vec::new(),
                comments: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if posts.is_empty() {
        return Ok(posts);
    }
    let ids: Vec<Value> = posts.iter().map(|p| Value::Integer(p.id)).collect();
    let marks = vec!["?"; ids.len()].join(", ");

    let mut comments: HashMap<i64, Vec<CommentRow>> = HashMap::new();
    let mut stmt = conn.prepare(&format!(
        "SELECT id, post_id, user_id, body, created_at FROM comments
         WHERE post_id IN ({marks})
         ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok(CommentRow {
            id: row.get(0)?,
            post_id: row.get(1)?,
            author_id: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    for row in rows {
        let row = row?;
        comments.entry(row.post_id).or_default().push(row);
    }

    let mut likes: HashMap<i64, Vec<LikeRow>> = HashMap::new();
    if let Some(user) = query.with_likes_of {
        let mut args = ids.clone();
        args.push(Value::Integer(user));
        let mut stmt = conn.prepare(&format!(
            "SELECT post_id, user_id, created_at FROM likes
             WHERE post_id IN ({marks}) AND user_id = ?"
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok(LikeRow {
                post_id: row.get(0)?,
                user_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        for row in rows {
            let row = row?;
            likes.entry(row.post_id).or_default().push(row);
        }
    }

    for post in &mut posts {
        post.comments = comments.remove(&post.id).unwrap_or_default();
        post.likes = likes.remove(&post.id).unwrap_or_default();
    }
    Ok(posts)
}
