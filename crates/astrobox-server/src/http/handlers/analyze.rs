use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};

use super::super::types::{AnalyzeRequest, ApiError};
use super::AppState;

/// Probe URLs for preview metadata and available streams.
pub async fn analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::bad_request("Invalid URL payload."))?;
    let report = state.engine.analyze(request.urls).await?;
    Ok(Json(report))
}
