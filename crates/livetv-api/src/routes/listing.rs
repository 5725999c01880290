use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lives.m3u", get(lives_m3u))
        .route("/lives.txt", get(lives_txt))
        .route("/cache.txt", get(cache_dump))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

pub(crate) fn require_secret(state: &AppState, query: &TokenQuery) -> Result<(), ApiError> {
    if state.authorized(query.token.as_deref(), &state.service.secret_token()) {
        Ok(())
    } else {
        Err(ApiError::bad_token())
    }
}

async fn lives_m3u(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    require_secret(&state, &query)?;
    let body = state.service.render_m3u().await?;
    Ok(([(header::CONTENT_TYPE, "audio/x-mpegurl; charset=utf-8")], body).into_response())
}

async fn lives_txt(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    require_secret(&state, &query)?;
    let body = state.service.render_txt().await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

/// `source => live url`, one line per cached resolution.
async fn cache_dump(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    require_secret(&state, &query)?;
    let mut body = String::new();
    for (source, live_url) in state.service.cache_snapshot() {
        body.push_str(&source);
        body.push_str(" => ");
        body.push_str(&live_url);
        body.push('\n');
    }
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}
