use astrobox_core::job::JobStatus;
use astrobox_core::store::{HistoryFilter, DEFAULT_PAGE};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};

use super::super::types::{ApiError, HistoryItemResponse, HistoryListResponse, HistoryQuery};
use super::AppState;

pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(|e| ApiError::bad_request(e.to_string()))?,
        ),
        None => None,
    };
    let filter = HistoryFilter {
        status,
        query: query.q,
        limit: query.limit.filter(|n| *n > 0).unwrap_or(DEFAULT_PAGE),
        offset: query.offset.unwrap_or(0),
    };
    Ok(Json(HistoryListResponse {
        items: state.engine.history(&filter),
    }))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (item, logs) = id
        .parse()
        .ok()
        .and_then(|id| state.engine.history_item(id))
        .ok_or_else(|| ApiError::not_found("Not found."))?;
    Ok(Json(HistoryItemResponse { item, logs }))
}
