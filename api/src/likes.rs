use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use relatos_shared::{Affected, Collection, LikeRow, NewLike};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use tracing::error;

use crate::{auth, db, AppState};

#[derive(Deserialize)]
pub struct LikeKey {
    post_id: i64,
    user_id: i64,
}

/// GET /api/likes?post_id=1&user_id=2
pub async fn find_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(key): Query<LikeKey>,
) -> Result<Json<Option<LikeRow>>, StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    if key.user_id != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    let pool = state.db.clone();
    let like = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row(
            "SELECT post_id, user_id, created_at FROM likes
             WHERE post_id = ?1 AND user_id = ?2",
            rusqlite::params![key.post_id, key.user_id],
            |row| {
                Ok(LikeRow {
                    post_id: row.get(0)?,
                    user_id: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(like))
}

/// POST /api/likes
///
/// A second like for the same pair is a 409.
pub async fn create_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewLike>,
) -> Result<StatusCode, StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    if payload.user_id != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    let pool = state.db.clone();
    let post_id = payload.post_id;

    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "INSERT INTO likes (post_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![post_id, user_id],
        )
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                StatusCode::CONFLICT
            } else if db::is_foreign_key_violation(&e) {
                StatusCode::NOT_FOUND
            } else {
                error!(error = %e, "like insert failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state.publish(Collection::Likes);
    Ok(StatusCode::CREATED)
}

/// DELETE /api/likes?post_id=1&user_id=2
pub async fn delete_like(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(key): Query<LikeKey>,
) -> Result<Json<Affected>, StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    if key.user_id != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    let pool = state.db.clone();
    let affected = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "DELETE FROM likes WHERE post_id = ?1 AND user_id = ?2",
            rusqlite::params![key.post_id, user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if affected > 0 {
        state.publish(Collection::Likes);
    }
    Ok(Json(Affected {
        affected: affected as u64,
    }))
}
