//! Gateway over the relatos HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use relatos_shared::{
    Affected, ChangeEvent, Collection, FeedQuery, LikeRow, NewComment, NewLike, NewPost, PostId,
    PostRow, RowCount, UserId, Viewer,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::GatewayError;
use crate::gateway::{ChangeStream, Gateway, GatewayResult};

#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    token: Option<String>,
    client: Client,
    request_timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: sanitize_base_url(base_url.into()),
            token,
            // No client-wide timeout: it would also cut the change stream.
            client: Client::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> GatewayResult<Response> {
        let resp = self
            .authorize(req)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> GatewayResult<T> {
        let resp = self.send(self.client.get(self.url(path)).query(query)).await?;
        resp.json().await.map_err(transport_error)
    }

    async fn post<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> GatewayResult<()> {
        self.send(self.client.post(self.url(path)).json(body)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str, query: &[(&str, String)]) -> GatewayResult<Affected> {
        let resp = self.send(self.client.delete(self.url(path)).query(query)).await?;
        resp.json().await.map_err(transport_error)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn viewer(&self) -> GatewayResult<Option<Viewer>> {
        if self.token.is_none() {
            return Ok(None);
        }
        match self.get::<Viewer>("/api/auth/me", &[]).await {
            Ok(viewer) => Ok(Some(viewer)),
            Err(GatewayError::Unauthorized) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn query_posts(&self, query: &FeedQuery) -> GatewayResult<Vec<PostRow>> {
        self.get("/api/posts", &feed_query_params(query)).await
    }

    async fn count_posts(&self) -> GatewayResult<u64> {
        let count: RowCount = self.get("/api/posts/count", &[]).await?;
        Ok(count.count)
    }

    async fn find_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Option<LikeRow>> {
        self.get(
            "/api/likes",
            &[("post_id", post_id.to_string()), ("user_id", user_id.to_string())],
        )
        .await
    }

    async fn insert_post(&self, post: &NewPost) -> GatewayResult<()> {
        self.post("/api/posts", post).await
    }

    async fn insert_like(&self, like: &NewLike) -> GatewayResult<()> {
        self.post("/api/likes", like).await
    }

    async fn insert_comment(&self, comment: &NewComment) -> GatewayResult<()> {
        self.post("/api/comments", comment).await
    }

    async fn delete_like(&self, post_id: PostId, user_id: UserId) -> GatewayResult<Affected> {
        self.delete(
            "/api/likes",
            &[("post_id", post_id.to_string()), ("user_id", user_id.to_string())],
        )
        .await
    }

    async fn delete_post(&self, post_id: PostId, author_id: UserId) -> GatewayResult<Affected> {
        self.delete(
            &format!("/api/posts/{post_id}"),
            &[("author_id", author_id.to_string())],
        )
        .await
    }

    async fn subscribe(&self, collection: Collection) -> GatewayResult<ChangeStream> {
        let req = self
            .client
            .get(self.url("/api/changes"))
            .query(&[("collection", collection.as_str())])
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_status(resp).await?;
        debug!(collection = collection.as_str(), "subscribed to change stream");

        let body = Box::pin(resp.bytes_stream());
        let events = stream::unfold((body, Vec::new()), |(mut body, mut buf)| async move {
            loop {
                if let Some(event) = take_event(&mut buf) {
                    return Some((event, (body, buf)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(err)) => {
                        warn!(error = %err, "change stream interrupted");
                        return None;
                    }
                    None => return None,
                }
            }
        });
        Ok(Box::pin(events))
    }
}

fn feed_query_params(query: &FeedQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if !query.categories.is_empty() {
        params.push(("categories", query.categories.join(",")));
    }
    if let Some(user) = query.only_liked_by {
        params.push(("only_liked_by", user.to_string()));
    }
    if let Some(user) = query.with_likes_of {
        params.push(("with_likes_of", user.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset", offset.to_string()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit", limit.to_string()));
    }
    params
}

/// Pops the first complete server-sent event carrying a change payload.
/// Comment frames (keep-alives) and unparsable data are skipped. Bytes are
/// only decoded once a whole frame has arrived, so characters split across
/// network chunks survive.
fn take_event(buf: &mut Vec<u8>) -> Option<ChangeEvent> {
    loop {
        let end = frame_end(buf)?;
        let frame: Vec<u8> = buf.drain(..end).collect();
        let frame = String::from_utf8_lossy(&frame);
        let data: String = frame
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .collect();
        if data.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChangeEvent>(&data) {
            Ok(event) => return Some(event),
            Err(err) => debug!(error = %err, "ignoring unparsable change frame"),
        }
    }
}

/// Length of the first frame including its blank-line terminator, which
/// may be `\n\n` or `\r\n\r\n`.
fn frame_end(buf: &[u8]) -> Option<usize> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Backend(err.to_string())
    }
}

async fn check_status(resp: Response) -> GatewayResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => GatewayError::Unauthorized,
        StatusCode::FORBIDDEN => GatewayError::Forbidden,
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        StatusCode::CONFLICT => GatewayError::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GatewayError::Timeout,
        s if s.is_client_error() => GatewayError::Rejected(format!("{s}: {message}")),
        s => GatewayError::Backend(format!("API error: {s}")),
    })
}

fn sanitize_base_url(mut base: String) -> String {
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    base
}
