//! Player-facing endpoints: channel feeds and the segment and sub-playlist
//! proxies their rewritten links point at.

use std::collections::{BTreeMap, HashMap};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use livetv_core::{ChannelId, Feed};

use crate::error::ApiError;
use crate::state::AppState;

pub const MPEGURL: &str = "application/vnd.apple.mpegurl";

/// Client headers that never reach upstream.
const DROPPED_HEADERS: [&str; 6] = [
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "accept-encoding",
    "origin",
];

/// Upstream response headers relayed to the player.
const RELAYED_HEADERS: [&str; 5] = [
    "cache-control",
    "content-range",
    "accept-ranges",
    "last-modified",
    "etag",
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live.m3u8", get(live_feed))
        .route("/live.ts", get(proxy_stream))
        .route("/proxy", get(proxy_stream))
        .route("/playlist.m3u8", get(proxy_playlist))
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub c: Option<String>,
    pub token: Option<String>,
    pub sid: Option<String>,
}

async fn live_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, ApiError> {
    let id: ChannelId = query
        .c
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::unavailable())?;
    if !state.authorized(query.token.as_deref(), &state.service.access_token(&id)) {
        return Err(ApiError::bad_token());
    }

    let channel = match query.sid.as_deref().filter(|sid| !sid.is_empty()) {
        Some(sid) => state.service.channel_by_digest(&id, sid).await,
        None => state.service.channel(&id).await,
    }
    .map_err(|e| {
        tracing::debug!(channel_id = %id, error = %e, "Channel lookup failed");
        ApiError::unavailable()
    })?;

    let feed = state.service.feed(&channel).await.map_err(|e| {
        tracing::warn!(channel_id = %channel.id, source_url = %channel.url, error = %e, "Feed unavailable");
        ApiError::from(e)
    })?;

    let response = match feed {
        Feed::Playlist(body) => ([(header::CONTENT_TYPE, MPEGURL)], body).into_response(),
        Feed::Redirect(target) => (StatusCode::FOUND, [(header::LOCATION, target)]).into_response(),
        Feed::Stream { content_type, body } => (
            [(header::CONTENT_TYPE, content_type)],
            Body::from_stream(body),
        )
            .into_response(),
    };
    Ok(response)
}

async fn proxy_stream(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = authorize_proxy(&state, &query)?;
    let upstream = state
        .service
        .proxy_stream(key, &upstream_headers(&headers, &query), upstream_proxy(&query))
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Segment proxy failed");
            ApiError::from(e)
        })?;

    let status = StatusCode::from_u16(upstream.status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if !upstream.content_type.is_empty() {
        builder = builder.header(header::CONTENT_TYPE, upstream.content_type.clone());
    }
    for name in RELAYED_HEADERS {
        if let Some(value) = upstream.headers().get(name).and_then(|v| v.to_str().ok()) {
            builder = builder.header(name, value.to_string());
        }
    }
    builder
        .body(Body::from_stream(upstream.into_stream()))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn proxy_playlist(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = authorize_proxy(&state, &query)?;
    let body = state
        .service
        .proxy_playlist(key, &upstream_headers(&headers, &query), upstream_proxy(&query))
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Sub-playlist proxy failed");
            ApiError::from(e)
        })?;
    Ok(([(header::CONTENT_TYPE, MPEGURL)], body).into_response())
}

/// Checks the live token and returns the opaque resource key.
fn authorize_proxy<'q>(state: &AppState, query: &'q HashMap<String, String>) -> Result<&'q str, ApiError> {
    if !state.authorized(query.get("token").map(String::as_str), &state.service.live_token()) {
        return Err(ApiError::bad_token());
    }
    query
        .get("k")
        .map(String::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing resource key".to_string()))
}

fn upstream_proxy(query: &HashMap<String, String>) -> Option<&str> {
    query.get("proxy").map(String::as_str).filter(|p| !p.is_empty())
}

/// Client headers worth replaying upstream, overridden by `header*` query
/// parameters (`headerReferer=x` sends `Referer: x`).
pub fn upstream_headers(client: &HeaderMap, query: &HashMap<String, String>) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for (name, value) in client {
        let name = name.as_str();
        if name.starts_with("x-") || DROPPED_HEADERS.contains(&name) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }
    for (key, value) in query {
        if let Some(name) = key.strip_prefix("header").filter(|n| !n.is_empty()) {
            headers.retain(|existing: &String, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.to_string(), value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_headers_are_filtered_and_query_headers_win() {
        let mut client = HeaderMap::new();
        client.insert("host", HeaderValue::from_static("relay.local"));
        client.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        client.insert("referer", HeaderValue::from_static("http://player"));
        client.insert("range", HeaderValue::from_static("bytes=0-"));

        let query = HashMap::from([
            ("headerReferer".to_string(), "http://origin".to_string()),
            ("header".to_string(), "ignored".to_string()),
            ("token".to_string(), "t".to_string()),
        ]);

        let headers = upstream_headers(&client, &query);
        assert_eq!(headers.get("Referer").map(String::as_str), Some("http://origin"));
        assert!(!headers.contains_key("referer"));
        assert_eq!(headers.get("range").map(String::as_str), Some("bytes=0-"));
        assert!(!headers.contains_key("host"));
        assert!(!headers.contains_key("x-forwarded-for"));
        assert_eq!(headers.len(), 2);
    }
}
