use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use livetv_core::{RefreshSummary, StatusInfo};

use crate::error::ApiError;
use crate::routes::listing::{require_secret, TokenQuery};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plugins", get(list_plugins))
        .route("/status", get(list_status))
        .route("/refresh", post(refresh))
}

#[derive(Serialize)]
pub struct PluginsResponse {
    pub plugins: Vec<String>,
}

#[derive(Serialize)]
pub struct StatusEntry {
    pub url: String,
    #[serde(flatten)]
    pub info: StatusInfo,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub cache_size: usize,
    pub sources: Vec<StatusEntry>,
}

/// Plugin names by registration priority.
async fn list_plugins(State(state): State<AppState>) -> Json<PluginsResponse> {
    Json(PluginsResponse {
        plugins: state.service.plugins(),
    })
}

async fn list_status(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    require_secret(&state, &query)?;
    let mut sources: Vec<_> = state
        .service
        .status_snapshot()
        .into_iter()
        .map(|(url, info)| StatusEntry { url, info })
        .collect();
    sources.sort_by(|a, b| a.url.cmp(&b.url));
    Ok(Json(StatusResponse {
        cache_size: state.service.cache_len(),
        sources,
    }))
}

/// Runs one refresh sweep now.
async fn refresh(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<RefreshSummary>, ApiError> {
    require_secret(&state, &query)?;
    let summary = state.service.refresh_all().await?;
    tracing::info!(
        refreshed = summary.refreshed,
        failed = summary.failed,
        skipped = summary.skipped,
        evicted = summary.evicted,
        "Manual refresh finished"
    );
    Ok(Json(summary))
}
