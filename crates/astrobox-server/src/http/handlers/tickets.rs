use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};

use super::super::types::{ApiError, TicketRequest};
use super::{parse_job_id, AppState};

/// Mint a short-lived ticket for a progress stream or a file download.
pub async fn issue_ticket(
    State(state): State<AppState>,
    body: Result<Json<TicketRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::bad_request("Invalid ticket request."))?;
    let job_id = parse_job_id(request.job_id.trim())
        .map_err(|_| ApiError::bad_request("Invalid ticket request."))?;
    let ticket = state.engine.issue_ticket(request.scope, job_id)?;
    tracing::debug!(job_id = %job_id, scope = ?request.scope, "ticket issued");
    Ok(Json(ticket))
}
