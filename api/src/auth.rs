use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use relatos_shared::Viewer;
use serde::{Deserialize, Serialize};

use crate::AppState;

// ── JWT Claims ──

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,      // user id
    pub email: String,
    pub exp: usize,    // expiry (unix timestamp)
}

impl Claims {
    pub fn new(viewer: &Viewer, ttl_secs: usize) -> Self {
        Self {
            sub: viewer.id,
            email: viewer.email.clone(),
            exp: now_secs() + ttl_secs,
        }
    }
}

fn now_secs() -> usize {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or(0)
}

/// Signs a session token for `viewer`. Tokens are minted by the identity
/// provider in production; this is its shared-secret equivalent.
pub fn issue_token(
    viewer: &Viewer,
    jwt_secret: &str,
    ttl_secs: usize,
) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::default(),
        &Claims::new(viewer, ttl_secs),
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
}

// ── Extract authenticated viewer from Authorization header ──

pub fn extract_viewer(headers: &HeaderMap, jwt_secret: &str) -> Result<Viewer, StatusCode> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(Viewer {
        id: data.claims.sub,
        email: data.claims.email,
    })
}

pub fn extract_user_id(headers: &HeaderMap, jwt_secret: &str) -> Result<i64, StatusCode> {
    extract_viewer(headers, jwt_secret).map(|v| v.id)
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Viewer>, StatusCode> {
    extract_viewer(&headers, &state.jwt_secret).map(Json)
}
