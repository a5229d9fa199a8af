use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use relatos_shared::{Collection, NewComment, MAX_COMMENT_CHARS};
use tracing::error;

use crate::{auth, db, AppState};

/// POST /api/comments
pub async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewComment>,
) -> Result<StatusCode, StatusCode> {
    let user_id = auth::extract_user_id(&headers, &state.jwt_secret)?;
    if payload.author_id != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    if payload.body.trim().is_empty() || payload.body.chars().count() > MAX_COMMENT_CHARS {
        return Err(StatusCode::BAD_REQUEST);
    }
    let body = payload.body;

    let pool = state.db.clone();
    let post_id = payload.post_id;

    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "INSERT INTO comments (post_id, user_id, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![post_id, user_id, body],
        )
        .map_err(|e| {
            if db::is_foreign_key_violation(&e) {
                StatusCode::NOT_FOUND
            } else {
                error!(error = %e, "comment insert failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state.publish(Collection::Comments);
    Ok(StatusCode::CREATED)
}
